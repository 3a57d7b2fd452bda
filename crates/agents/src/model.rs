use std::pin::Pin;

use {
    async_trait::async_trait,
    relay_config::ProviderConfig,
    relay_sessions::Turn,
    tokio_stream::Stream,
};

use crate::error::Result;

/// Events emitted during streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A text delta.
    Delta(String),
    /// Stream completed successfully.
    Done(Usage),
    /// An error occurred. Always the last event.
    Error(String),
}

/// Sampling knobs sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

impl From<&ProviderConfig> for GenerationParams {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// LLM provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier (e.g. "claude-opus-4-20250514").
    fn id(&self) -> &str;

    /// Send the whole transcript and wait for the full reply.
    async fn complete(&self, turns: &[Turn], params: &GenerationParams)
    -> Result<CompletionResponse>;

    /// Stream a completion, yielding delta/done/error events.
    ///
    /// The stream ends after the first `Done` or `Error` event.
    fn stream(
        &self,
        turns: Vec<Turn>,
        params: GenerationParams,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>>;
}

/// Response from an LLM completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
