//! Liveness heartbeats backed by TTL'd transport keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::HeartbeatSettings;
use crate::protocol::health_key;

use super::agent::AgentHandle;

/// Liveness record stored under `agents.<name>.health`.
///
/// Refreshed each heartbeat tick with a TTL; absence after the TTL *is* the
/// "agent is down" signal. There is no explicit delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthRecord {
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
    pub instance_id: String,
}

impl HealthRecord {
    pub fn active(instance_id: impl Into<String>) -> Self {
        Self {
            status: "active".to_string(),
            last_heartbeat: Utc::now(),
            instance_id: instance_id.into(),
        }
    }
}

/// Refresh the agent's liveness record every interval until shutdown.
///
/// The first refresh happens immediately so discovery sees the agent as soon
/// as it starts; the TTL exceeds the interval, so a couple of missed ticks
/// are tolerated before observers treat the agent as down.
pub(crate) async fn heartbeat_loop(
    handle: AgentHandle,
    settings: HeartbeatSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let key = health_key(handle.name());
    loop {
        let record = HealthRecord::active(handle.instance_id());
        match serde_json::to_vec(&record) {
            Ok(bytes) => {
                if let Err(e) = handle
                    .transport()
                    .set_with_ttl(&key, bytes, settings.ttl())
                    .await
                {
                    tracing::warn!(agent = %handle.name(), error = %e, "Heartbeat refresh failed");
                }
            }
            Err(e) => {
                tracing::warn!(agent = %handle.name(), error = %e, "Heartbeat record serialization failed");
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(settings.interval()) => {}
        }
    }
    tracing::debug!(agent = %handle.name(), "Heartbeat loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_record_round_trip() {
        let record = HealthRecord::active("instance-1");
        let bytes = serde_json::to_vec(&record).unwrap();
        let decoded: HealthRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.status, "active");
    }
}
