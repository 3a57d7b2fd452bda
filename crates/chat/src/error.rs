use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("no usable content: the prompt was empty and no upload could be processed")]
    NoContent,

    #[error(transparent)]
    Provider(#[from] relay_agents::Error),

    #[error(transparent)]
    Session(#[from] relay_sessions::Error),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether the caller sent something unusable, as opposed to the model
    /// call failing.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::EmptyPrompt | Self::NoContent | Self::Session(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
