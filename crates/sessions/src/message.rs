//! Typed conversation turns.
//!
//! These are the only things that ever reach the model: a role plus an
//! ordered list of text or inline-image segments.

use serde::{Deserialize, Serialize};

/// Which party a turn belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Atomic unit of turn content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSegment {
    Text {
        text: String,
    },
    /// Inline image. `data` is the base64 encoding of the image bytes and is
    /// already within the configured image budget.
    Image {
        media_type: String,
        data: String,
    },
}

impl ContentSegment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } => None,
        }
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }
}

/// One party's contribution to the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentSegment>,
}

impl Turn {
    /// A user turn made of arbitrary segments.
    #[must_use]
    pub fn user(content: Vec<ContentSegment>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    /// A user turn holding a single text segment.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![ContentSegment::text(text)])
    }

    /// An assistant turn holding the reply text.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentSegment::text(text)],
        }
    }

    /// Concatenation of all text segments, ignoring images.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentSegment::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
