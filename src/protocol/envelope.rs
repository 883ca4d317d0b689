//! Message envelopes: the immutable unit of agent communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::types::{MessageKind, Priority};

/// Wire envelope exchanged between agents.
///
/// Immutable once constructed and sent. Serialized as the JSON object:
/// `{id, from_agent, to_agent, timestamp, kind, payload, priority,
/// requires_response, correlation_id}` with RFC-3339 timestamps so
/// heterogeneous agent processes can interoperate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Unique message ID (ULID), generated by the sender
    pub id: String,
    /// Sender agent name
    pub from_agent: String,
    /// Recipient agent name, or `"broadcast"`
    pub to_agent: String,
    /// Creation time. Carried for ordering/debugging, not protocol correctness.
    pub timestamp: DateTime<Utc>,
    /// Message kind
    pub kind: MessageKind,
    /// Open key/value payload, semantics owned by the application layer
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Advisory priority
    #[serde(default)]
    pub priority: Priority,
    /// Whether the sender expects a `Response` or `Error` back
    #[serde(default)]
    pub requires_response: bool,
    /// Links a request to its eventual reply/replies
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Create a new envelope with a fresh id and timestamp.
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        kind: MessageKind,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            id: generate_id(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            timestamp: Utc::now(),
            kind,
            payload,
            priority: Priority::Normal,
            requires_response: false,
            correlation_id: None,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Expect a `Response`/`Error` back. Ensures the correlation invariant:
    /// a request without an explicit correlation id uses its own id.
    pub fn with_requires_response(mut self, requires: bool) -> Self {
        self.requires_response = requires;
        if requires && self.correlation_id.is_none() {
            self.correlation_id = Some(self.id.clone());
        }
        self
    }

    /// Set the correlation id (e.g. a Director fan-out session id).
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Create a `Response` envelope addressed back to this envelope's sender.
    ///
    /// The request's correlation id is copied verbatim; a request that never
    /// set one is correlated by its message id.
    pub fn reply(&self, from_agent: impl Into<String>, payload: Map<String, Value>) -> Self {
        let mut response = Envelope::new(from_agent, self.from_agent.clone(), MessageKind::Response, payload);
        response.correlation_id = Some(
            self.correlation_id
                .clone()
                .unwrap_or_else(|| self.id.clone()),
        );
        response
    }

    /// Create an `Error` envelope addressed back to this envelope's sender,
    /// carrying the failure description in the payload.
    pub fn error_reply(&self, from_agent: impl Into<String>, error: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("error".to_string(), Value::String(error.to_string()));
        let mut reply = self.reply(from_agent, payload);
        reply.kind = MessageKind::Error;
        reply.priority = Priority::High;
        reply
    }

    /// Encode to the JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the JSON wire format.
    ///
    /// Fails with [`Error::MalformedMessage`] when required fields are
    /// missing or enum values are unrecognized.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::MalformedMessage(e.to_string()))
    }
}

fn generate_id() -> String {
    ulid::Ulid::new().to_string()
}
