//! Model provider interface, the Anthropic Messages client and the
//! timeout/retry wrapper placed in front of it.

pub mod error;
pub mod model;
pub mod providers;
pub mod retry;

pub use {
    error::{Error, Result},
    model::{CompletionResponse, GenerationParams, LlmProvider, StreamEvent, Usage},
    providers::{anthropic::AnthropicProvider, build_provider},
    retry::{ProviderErrorKind, RetryPolicy, RetryingProvider, classify_error, classify_message},
};
