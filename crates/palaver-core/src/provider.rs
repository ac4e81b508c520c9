//! Completion provider seam.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::UpstreamError;
use crate::fragment::TokenFragment;
use crate::messages::PromptMessage;

/// Finite, non-restartable sequence of fragments for one completion.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<TokenFragment, UpstreamError>> + Send>>;

/// Sampling parameters for one completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Token cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Frequency penalty.
    pub frequency_penalty: f32,
    /// Presence penalty.
    pub presence_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            temperature: 0.7,
            top_p: 0.95,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

/// Source of streamed completions.
///
/// Implementations open the upstream request in [`stream`](Self::stream) and
/// return fragments as they arrive. Dropping the stream abandons the request.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name for logs and metrics.
    fn name(&self) -> &str;

    /// Start a streaming completion.
    async fn stream(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<FragmentStream, UpstreamError>;
}
