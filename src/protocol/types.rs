//! Message kinds and priorities for the agent protocol.

use serde::{Deserialize, Serialize};

/// Message kind classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Instruct an agent to do something
    Command,
    /// Ask an agent for information
    Query,
    /// Reply to a command or query
    Response,
    /// Fire-and-forget notification
    Event,
    /// Liveness signal
    Heartbeat,
    /// Failure report tied to a request via correlation id
    Error,
}

impl MessageKind {
    /// All kinds, in wire order. Used to pre-size handler tables.
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Command,
        MessageKind::Query,
        MessageKind::Response,
        MessageKind::Event,
        MessageKind::Heartbeat,
        MessageKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Command => "command",
            MessageKind::Query => "query",
            MessageKind::Response => "response",
            MessageKind::Event => "event",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Error => "error",
        }
    }
}

/// Message priority levels.
///
/// Encoded as integers on the wire (1 = most urgent). Advisory metadata
/// only: the transport delivers FIFO per channel and no reordering happens
/// on the receive side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            1 => Ok(Priority::Critical),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Normal),
            4 => Ok(Priority::Low),
            other => Err(format!("unknown priority value: {other}")),
        }
    }
}
