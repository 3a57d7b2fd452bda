//! Media kind detection for uploaded files.

use std::{fmt, path::Path};

/// Document families with a text extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Pdf,
    Word,
    Spreadsheet,
    Csv,
    PlainText,
}

impl DocumentKind {
    pub const ALL: [Self; 5] = [
        Self::Pdf,
        Self::Word,
        Self::Spreadsheet,
        Self::Csv,
        Self::PlainText,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "word",
            Self::Spreadsheet => "spreadsheet",
            Self::Csv => "csv",
            Self::PlainText => "text",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the normalizer should do with an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Document(DocumentKind),
    /// Nothing we can read; gets a fallback note.
    Binary,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document(kind) => kind.as_str(),
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick a media kind from the declared content type, falling back to the
/// filename extension when the type is absent, generic or unrecognised.
#[must_use]
pub fn detect_kind(declared: Option<&str>, filename: &str) -> MediaKind {
    declared
        .and_then(kind_from_media_type)
        .or_else(|| kind_from_extension(filename))
        .unwrap_or(MediaKind::Binary)
}

fn kind_from_media_type(declared: &str) -> Option<MediaKind> {
    // Drop parameters such as `; charset=utf-8`.
    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let kind = match essence.as_str() {
        "" | "application/octet-stream" => return None,
        "application/pdf" => MediaKind::Document(DocumentKind::Pdf),
        "application/msword"
        | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            MediaKind::Document(DocumentKind::Word)
        },
        "application/vnd.ms-excel"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            MediaKind::Document(DocumentKind::Spreadsheet)
        },
        "text/csv" | "application/csv" => MediaKind::Document(DocumentKind::Csv),
        "text/plain" => MediaKind::Document(DocumentKind::PlainText),
        other if other.starts_with("image/") => MediaKind::Image,
        _ => return None,
    };
    Some(kind)
}

fn kind_from_extension(filename: &str) -> Option<MediaKind> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();

    let kind = match ext.as_str() {
        "pdf" => MediaKind::Document(DocumentKind::Pdf),
        "doc" | "docx" => MediaKind::Document(DocumentKind::Word),
        "xls" | "xlsx" => MediaKind::Document(DocumentKind::Spreadsheet),
        "csv" => MediaKind::Document(DocumentKind::Csv),
        "txt" => MediaKind::Document(DocumentKind::PlainText),
        "png" | "jpg" | "jpeg" | "gif" | "webp" => MediaKind::Image,
        _ => return None,
    };
    Some(kind)
}
