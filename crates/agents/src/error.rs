use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no API key configured for {provider}")]
    MissingApiKey { provider: &'static str },

    #[error("{provider} API error HTTP {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
