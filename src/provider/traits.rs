//! Completion provider trait definitions
//!
//! A provider turns a fully-assembled prompt into model text, either as a
//! stream of fragments or as one complete string.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;

/// Stream of text fragments; an `Err` item ends the stream
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// One completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Complete prompt text, sent as a single user message
    pub prompt: String,
    /// Provider model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            temperature,
        }
    }
}

/// Core trait for completion providers
///
/// Implementations report a missing credential as
/// `Error::MissingCredential` from both methods.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name used in logs and error messages
    fn name(&self) -> &str;

    /// Open a fragment stream for the request
    async fn stream_completion(&self, request: &CompletionRequest) -> Result<FragmentStream>;

    /// Generate the whole completion in one call
    async fn generate_completion(&self, request: &CompletionRequest) -> Result<String>;
}
