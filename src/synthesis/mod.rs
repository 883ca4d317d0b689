//! Synthesis service seam: merges multiple agent answers into one prose
//! reply. Absence or failure always degrades to a deterministic summary.

pub mod ollama;

use async_trait::async_trait;
use thiserror::Error;

pub use ollama::OllamaSynthesizer;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, SynthesisError>;

/// Text-generation collaborator the Director may call during aggregation.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Service name, for logging.
    fn name(&self) -> &str;

    /// Check if the service is reachable right now.
    async fn is_available(&self) -> bool;

    /// Generate a completion for the prompt. Failure is treated by callers
    /// as "unavailable for this call", never propagated.
    async fn generate(&self, prompt: &str) -> Result<String>;
}
