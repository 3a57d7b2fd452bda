use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid session key: {reason}")]
    InvalidKey { reason: &'static str },
}

impl Error {
    #[must_use]
    pub fn invalid_key(reason: &'static str) -> Self {
        Self::InvalidKey { reason }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
