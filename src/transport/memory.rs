//! In-process transport for tests and the demo CLI.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{StreamExt, StreamMap};

use crate::error::Result;

use super::{Subscription, Transport};

/// Frames buffered per channel before slow subscribers start losing messages.
const CHANNEL_CAPACITY: usize = 256;

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// In-memory pub/sub plus expiring key/value store.
///
/// Channels are tokio broadcast channels (FIFO per channel, fan-out to every
/// subscriber). Keys expire lazily: reads and scans drop anything past its
/// deadline.
#[derive(Default)]
pub struct MemoryTransport {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    store: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, channel: &str, frame: Vec<u8>) -> Result<()> {
        // A send error just means no subscriber is attached yet.
        let _ = self.sender_for(channel).send(frame);
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let mut map = StreamMap::new();
        for channel in channels {
            let rx = self.sender_for(channel).subscribe();
            map.insert(channel.clone(), BroadcastStream::new(rx));
        }
        // Lagged receivers surface as Err items; those frames are lost, the
        // subscription itself stays alive.
        let stream = map.filter_map(|(_, frame)| frame.ok());
        Ok(Box::pin(stream))
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        store.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut store = self.store.lock().unwrap();
        match store.get(key) {
            Some(value) if value.expires_at > Instant::now() => Ok(Some(value.bytes.clone())),
            Some(_) => {
                store.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut store = self.store.lock().unwrap();
        store.retain(|_, value| value.expires_at > now);

        let mut keys: Vec<String> = store
            .keys()
            .filter(|key| pattern_matches(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Match a key against a pattern where `*` spans any run of characters.
fn pattern_matches(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let Some((first, rest)) = parts.split_first() else {
        return false;
    };
    let Some((last, middles)) = rest.split_last() else {
        return false;
    };

    if !key.starts_with(first) || !key.ends_with(last) {
        return false;
    }
    if key.len() < first.len() + last.len() {
        return false;
    }

    let mut window = &key[first.len()..key.len() - last.len()];
    for middle in middles {
        match window.find(middle) {
            Some(pos) => window = &window[pos + middle.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("agents.*.health", "agents.Calendar.health"));
        assert!(pattern_matches("agents.*.health", "agents.x.y.health"));
        assert!(!pattern_matches("agents.*.health", "agents.Calendar.commands"));
        assert!(!pattern_matches("agents.*.health", "other.Calendar.health"));
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("agents.*", "agents."));
        assert!(!pattern_matches("agents.*", "agent"));
        assert!(pattern_matches("exact.key", "exact.key"));
        assert!(!pattern_matches("exact.key", "exact.key.more"));
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let transport = MemoryTransport::new();
        let mut sub = transport
            .subscribe(&["agents.a.commands".to_string()])
            .await
            .unwrap();

        transport
            .publish("agents.a.commands", b"hello".to_vec())
            .await
            .unwrap();

        let frame = sub.next().await.unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn test_broadcast_fan_out() {
        let transport = MemoryTransport::new();
        let mut a = transport.subscribe(&["broadcast.all".to_string()]).await.unwrap();
        let mut b = transport.subscribe(&["broadcast.all".to_string()]).await.unwrap();

        transport.publish("broadcast.all", b"ping".to_vec()).await.unwrap();

        assert_eq!(a.next().await.unwrap(), b"ping");
        assert_eq!(b.next().await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_merged_subscription() {
        let transport = MemoryTransport::new();
        let mut sub = transport
            .subscribe(&["agents.a.commands".to_string(), "broadcast.all".to_string()])
            .await
            .unwrap();

        transport.publish("broadcast.all", b"one".to_vec()).await.unwrap();
        transport.publish("agents.a.commands", b"two".to_vec()).await.unwrap();

        let mut got = vec![sub.next().await.unwrap(), sub.next().await.unwrap()];
        got.sort();
        assert_eq!(got, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let transport = MemoryTransport::new();
        transport
            .set_with_ttl("agents.a.health", b"{}".to_vec(), Duration::from_millis(40))
            .await
            .unwrap();

        assert!(transport.get("agents.a.health").await.unwrap().is_some());
        assert_eq!(
            transport.scan("agents.*.health").await.unwrap(),
            vec!["agents.a.health".to_string()]
        );

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(transport.get("agents.a.health").await.unwrap().is_none());
        assert!(transport.scan("agents.*.health").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_extends_ttl() {
        let transport = MemoryTransport::new();
        transport
            .set_with_ttl("k", b"1".to_vec(), Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        transport
            .set_with_ttl("k", b"2".to_vec(), Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Would have expired without the refresh.
        assert_eq!(transport.get("k").await.unwrap(), Some(b"2".to_vec()));
    }
}
