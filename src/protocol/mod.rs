//! Agent communication protocol for Majordomo.
//!
//! This module defines the wire-level contract every agent speaks:
//! - Message envelopes with correlation IDs
//! - Typed message kinds (command, query, response, event, heartbeat, error)
//! - Channel and liveness-key naming

pub mod envelope;
pub mod types;

pub use envelope::Envelope;
pub use types::{MessageKind, Priority};

/// Address every broadcast envelope is sent to.
pub const BROADCAST: &str = "broadcast";

/// Channel all agents subscribe to for broadcast delivery.
pub const BROADCAST_CHANNEL: &str = "broadcast.all";

/// Pattern matching every agent's liveness key.
pub const HEALTH_PATTERN: &str = "agents.*.health";

/// Per-agent inbound channel.
pub fn commands_channel(agent: &str) -> String {
    format!("agents.{agent}.commands")
}

/// Per-agent liveness key, refreshed by the heartbeat with a TTL.
pub fn health_key(agent: &str) -> String {
    format!("agents.{agent}.health")
}

/// Extract the agent name from a liveness key (`agents.<name>.health`).
pub fn agent_from_health_key(key: &str) -> Option<&str> {
    key.strip_prefix("agents.")?.strip_suffix(".health")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_naming() {
        assert_eq!(commands_channel("Calendar"), "agents.Calendar.commands");
        assert_eq!(health_key("Task"), "agents.Task.health");
    }

    #[test]
    fn test_agent_from_health_key() {
        assert_eq!(agent_from_health_key("agents.Email.health"), Some("Email"));
        assert_eq!(agent_from_health_key("agents.Email.commands"), None);
        assert_eq!(agent_from_health_key("other.Email.health"), None);
    }
}
