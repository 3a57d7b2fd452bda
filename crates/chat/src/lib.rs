//! Conversation engine: turns prompts and uploads into model calls against a
//! session transcript, keeping the transcript consistent when calls fail.

pub mod error;
pub mod normalize;
pub mod service;

pub use {
    error::{Error, Result},
    normalize::{NormalizedContent, Normalizer, UploadArtifact},
    service::{AttachmentReply, ChatService, ReplyChunk, ReplyStream},
};
