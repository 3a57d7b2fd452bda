use std::error::Error as StdError;

use crate::mime::DocumentKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("{message}")]
    InvalidInput { message: String },
    #[error("image processing failed: {source}")]
    Image {
        #[source]
        source: image::ImageError,
    },
    #[error("image does not fit in {budget} encoded bytes ({reason})")]
    BudgetUnreachable { budget: usize, reason: &'static str },
    #[error("{kind} extraction failed: {message}")]
    Extraction { kind: DocumentKind, message: String },
}

impl Error {
    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn extraction(kind: DocumentKind, message: impl Into<String>) -> Self {
        Self::Extraction {
            kind,
            message: message.into(),
        }
    }

    /// Whether the bounded recompression loop gave up.
    #[must_use]
    pub fn is_budget_unreachable(&self) -> bool {
        matches!(self, Self::BudgetUnreachable { .. })
    }
}

impl From<image::ImageError> for Error {
    fn from(source: image::ImageError) -> Self {
        Self::Image { source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
