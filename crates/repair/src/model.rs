//! Text-generation port used to propose fixes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Errors returned by a model port.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    /// The backend could not be reached or refused the request
    #[error("Model backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something unusable
    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    /// The stream receiver went away before generation finished
    #[error("Stream receiver closed")]
    StreamClosed,
}

/// Constraints passed along with a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConstraints {
    /// Upper bound on generated tokens
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Optional system instruction
    pub system: Option<String>,
}

impl Default for GenerationConstraints {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.2,
            system: None,
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait ModelPort: Send + Sync {
    /// Generate a full completion for `prompt`.
    async fn generate(
        &self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String, GenerationError>;

    /// Generate incrementally, sending chunks as they arrive.
    ///
    /// Returns the full text. The default sends the whole completion as a
    /// single chunk.
    async fn generate_stream(
        &self,
        prompt: &str,
        constraints: &GenerationConstraints,
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<String, GenerationError> {
        let text = self.generate(prompt, constraints).await?;
        chunk_tx
            .send(text.clone())
            .await
            .map_err(|_| GenerationError::StreamClosed)?;
        Ok(text)
    }
}
