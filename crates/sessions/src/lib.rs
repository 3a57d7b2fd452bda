//! Conversation state.
//!
//! A [`Transcript`] is the ordered list of [`Turn`]s sent to the model on
//! every call. Transcripts live in memory only, one per [`SessionKey`], and
//! are handed out by the [`SessionRegistry`].

pub mod error;
pub mod key;
pub mod message;
pub mod registry;
pub mod transcript;

pub use {
    error::{Error, Result},
    key::SessionKey,
    message::{ContentSegment, Role, Turn},
    registry::{Session, SessionRegistry},
    transcript::Transcript,
};
