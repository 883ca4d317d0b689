//! Majordomo library root.

pub mod cli;
pub mod config;
pub mod director;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod runtime;
pub mod synthesis;
pub mod transport;

pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use director::{Director, Intent, OrchestrationResult, RoutingTable};
pub use error::{Error, Result};
pub use protocol::{Envelope, MessageKind, Priority};
pub use runtime::{AgentHandle, AgentRuntime, Lifecycle, MessageHandler};
pub use synthesis::{OllamaSynthesizer, Synthesizer};
pub use transport::{MemoryTransport, Transport};
