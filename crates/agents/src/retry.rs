//! Timeout and bounded retry in front of a single `LlmProvider`.
//!
//! Failures are classified from the error (or stream error message). Only
//! transient kinds are retried, with exponential backoff, and a stream is
//! never retried once it has delivered a fragment.

use std::{pin::Pin, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    futures::StreamExt,
    relay_config::ProviderConfig,
    relay_sessions::Turn,
    tokio_stream::Stream,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    model::{CompletionResponse, GenerationParams, LlmProvider, StreamEvent},
};

/// How a provider error should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 429.
    RateLimit,
    /// 401/403, bad or missing key.
    AuthError,
    /// 5xx or overloaded.
    ServerError,
    /// Billing/usage limit exhausted.
    BillingExhausted,
    /// Context window exceeded.
    ContextWindow,
    /// 400, bad format; it will fail again.
    InvalidRequest,
    /// No response within the configured timeout.
    Timeout,
    /// Connection could not be made or was dropped.
    Network,
    /// Response arrived but could not be understood.
    Malformed,
    /// Unrecognised error.
    Unknown,
}

impl ProviderErrorKind {
    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::ServerError | Self::Timeout | Self::Network
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::AuthError => "auth_error",
            Self::ServerError => "server_error",
            Self::BillingExhausted => "billing_exhausted",
            Self::ContextWindow => "context_window",
            Self::InvalidRequest => "invalid_request",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Malformed => "malformed",
            Self::Unknown => "unknown",
        }
    }
}

/// Error patterns for context window overflow.
const CONTEXT_WINDOW_PATTERNS: &[&str] = &[
    "context_length_exceeded",
    "too many tokens",
    "prompt is too long",
    "request too large",
    "maximum context length",
    "context window",
    "token limit",
    "request_too_large",
];

/// Classify an error message into a `ProviderErrorKind`.
#[must_use]
pub fn classify_message(message: &str) -> ProviderErrorKind {
    if let Some((status, body)) = split_http_status(message) {
        return classify_status(status, body);
    }

    let msg = message.to_lowercase();

    // Context window first, since "request too large" overlaps with 413.
    if CONTEXT_WINDOW_PATTERNS.iter().any(|p| msg.contains(p)) {
        return ProviderErrorKind::ContextWindow;
    }

    if msg.contains("429")
        || msg.contains("rate limit")
        || msg.contains("rate_limit")
        || msg.contains("too many requests")
    {
        return ProviderErrorKind::RateLimit;
    }

    if msg.contains("401")
        || msg.contains("403")
        || msg.contains("unauthorized")
        || msg.contains("forbidden")
        || msg.contains("invalid x-api-key")
        || msg.contains("invalid api key")
        || msg.contains("authentication")
        || msg.contains("no api key")
    {
        return ProviderErrorKind::AuthError;
    }

    if msg.contains("billing")
        || msg.contains("quota")
        || msg.contains("usage limit")
        || msg.contains("credit balance")
    {
        return ProviderErrorKind::BillingExhausted;
    }

    if msg.contains("500")
        || msg.contains("502")
        || msg.contains("503")
        || msg.contains("504")
        || msg.contains("529")
        || msg.contains("internal server error")
        || msg.contains("bad gateway")
        || msg.contains("service unavailable")
        || msg.contains("overloaded")
        || msg.contains("api_error")
    {
        return ProviderErrorKind::ServerError;
    }

    if msg.contains("timed out") || msg.contains("timeout") {
        return ProviderErrorKind::Timeout;
    }

    if msg.contains("error sending request")
        || msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("connection closed")
        || msg.contains("stream ended before")
        || msg.contains("request failed")
    {
        return ProviderErrorKind::Network;
    }

    if msg.contains("400") || msg.contains("bad request") || msg.contains("invalid_request") {
        return ProviderErrorKind::InvalidRequest;
    }

    if msg.contains("malformed") {
        return ProviderErrorKind::Malformed;
    }

    ProviderErrorKind::Unknown
}

/// Classify a typed provider error.
#[must_use]
pub fn classify_error(err: &Error) -> ProviderErrorKind {
    match err {
        Error::MissingApiKey { .. } => ProviderErrorKind::AuthError,
        Error::Timeout { .. } => ProviderErrorKind::Timeout,
        Error::Malformed(_) => ProviderErrorKind::Malformed,
        Error::Request(e) if e.is_timeout() => ProviderErrorKind::Timeout,
        Error::Request(e) if e.is_decode() => ProviderErrorKind::Malformed,
        Error::Request(_) => ProviderErrorKind::Network,
        Error::Http { status, body, .. } => classify_status(*status, body),
        Error::Message(msg) => classify_message(msg),
    }
}

/// Status codes decide first; the body only refines a 4xx we don't map.
fn classify_status(status: u16, body: &str) -> ProviderErrorKind {
    match status {
        429 => ProviderErrorKind::RateLimit,
        401 | 403 => ProviderErrorKind::AuthError,
        500..=599 => ProviderErrorKind::ServerError,
        _ => match classify_message(body) {
            ProviderErrorKind::Unknown => ProviderErrorKind::InvalidRequest,
            kind => kind,
        },
    }
}

/// Pull the status out of a `... HTTP <code>: <body>` message.
fn split_http_status(message: &str) -> Option<(u16, &str)> {
    let at = message.find("HTTP ")?;
    let rest = &message[at + "HTTP ".len()..];
    let digits = rest.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let status = digits.parse().ok()?;
    let body = rest[3..].trim_start_matches(':').trim_start();
    Some((status, body))
}

/// Attempt and timing limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub initial_backoff: Duration,
    /// Bound on a whole `complete` call and on each gap between stream events.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(120),
        }
    }
}

impl From<&ProviderConfig> for RetryPolicy {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(retry.min(16)))
    }
}

/// Wraps a provider with a timeout and bounded retry of transient failures.
///
/// Implements `LlmProvider` itself so callers don't need to know about it.
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn complete(
        &self,
        turns: &[Turn],
        params: &GenerationParams,
    ) -> Result<CompletionResponse> {
        let mut retry = 0;
        loop {
            let call = self.inner.complete(turns, params);
            let outcome = tokio::time::timeout(self.policy.timeout, call)
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Timeout {
                        after: self.policy.timeout,
                    })
                });

            let err = match outcome {
                Ok(resp) => return Ok(resp),
                Err(err) => err,
            };

            let kind = classify_error(&err);
            if !kind.is_transient() || retry >= self.policy.max_retries {
                debug!(provider = self.inner.id(), kind = ?kind, retry, "giving up on completion");
                return Err(err);
            }

            let delay = self.policy.backoff(retry);
            warn!(
                provider = self.inner.id(),
                error = %err,
                kind = ?kind,
                retry = retry + 1,
                delay_ms = delay.as_millis() as u64,
                "transient provider failure, retrying"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    fn stream(
        &self,
        turns: Vec<Turn>,
        params: GenerationParams,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
        Box::pin(async_stream::stream! {
            let mut retry = 0;
            loop {
                let mut inner = self.inner.stream(turns.clone(), params.clone());
                let mut delivered = false;

                let failure = loop {
                    match tokio::time::timeout(self.policy.timeout, inner.next()).await {
                        Err(_) => {
                            break Error::Timeout { after: self.policy.timeout }.to_string();
                        }
                        Ok(None) => {
                            break "stream ended before completion".to_string();
                        }
                        Ok(Some(StreamEvent::Delta(text))) => {
                            delivered = true;
                            yield StreamEvent::Delta(text);
                        }
                        Ok(Some(StreamEvent::Done(usage))) => {
                            yield StreamEvent::Done(usage);
                            return;
                        }
                        Ok(Some(StreamEvent::Error(msg))) => break msg,
                    }
                };
                drop(inner);

                let kind = classify_message(&failure);
                if delivered || !kind.is_transient() || retry >= self.policy.max_retries {
                    debug!(provider = self.inner.id(), kind = ?kind, delivered, retry, "stream failed");
                    yield StreamEvent::Error(failure);
                    return;
                }

                let delay = self.policy.backoff(retry);
                warn!(
                    provider = self.inner.id(),
                    error = %failure,
                    kind = ?kind,
                    retry = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    "transient stream failure before first fragment, retrying"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
        })
    }
}
