//! Error types for Majordomo.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A received frame could not be decoded into an envelope. Logged and
    /// dropped by the listener, never retried.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The agent could not attach to the transport or failed its
    /// domain initialization. Fatal to that `start()` call.
    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn handler(msg: impl Into<String>) -> Self {
        Error::Handler(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }
}
