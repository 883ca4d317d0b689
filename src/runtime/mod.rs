//! Agent runtime: the messaging substrate every agent is built on.
//!
//! Gives each agent a uniform way to send, receive, and heartbeat:
//! - Channel subscription and envelope dispatch
//! - Ordered handler tables per message kind
//! - TTL-backed liveness heartbeats

pub mod agent;
pub mod heartbeat;

pub use agent::{AgentHandle, AgentRuntime, AgentState, FnHandler, Lifecycle, MessageHandler, NoopLifecycle};
pub use heartbeat::HealthRecord;
