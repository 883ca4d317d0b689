//! Transport abstraction: the pub/sub broker plus expiring key/value store
//! shared by all agents.
//!
//! Agents assume nothing beyond publish, subscribe, set-with-ttl, get, and
//! pattern scan. No transactional semantics are required, so any broker
//! with those five operations can back a deployment; tests and the demo CLI
//! run on the in-process [`memory::MemoryTransport`].

pub mod memory;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::error::Result;

pub use memory::MemoryTransport;

/// Stream of raw frames delivered on a subscription.
pub type Subscription = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Publish/subscribe broker with per-key expiring values.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a frame to a channel. Delivery to subscribers is FIFO per
    /// channel; publishing to a channel nobody listens on is not an error.
    async fn publish(&self, channel: &str, frame: Vec<u8>) -> Result<()>;

    /// Subscribe to one or more channels, returning a single merged stream.
    async fn subscribe(&self, channels: &[String]) -> Result<Subscription>;

    /// Write a value that expires after `ttl` unless refreshed.
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Read a value, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// List live (unexpired) keys matching a `*`-wildcard pattern.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;
}
