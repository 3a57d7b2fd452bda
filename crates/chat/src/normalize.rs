//! Upload normalization: prompt plus artifacts to ordered content segments.

use {
    relay_config::MediaConfig,
    relay_media::{
        DocumentKind, ExtractorTable, ImageBudget, MediaKind, detect_kind, fit_to_budget,
    },
    relay_sessions::ContentSegment,
    tracing::{debug, warn},
};

/// One uploaded file, held in memory for the duration of a request.
#[derive(Debug, Clone)]
pub struct UploadArtifact {
    pub filename: String,
    pub declared_media_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadArtifact {
    pub fn new(
        filename: impl Into<String>,
        declared_media_type: Option<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            declared_media_type,
            bytes: bytes.into(),
        }
    }
}

/// Segments ready for a user turn, plus the filenames that produced one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedContent {
    pub segments: Vec<ContentSegment>,
    pub processed: Vec<String>,
}

/// `[File: <name>]` header followed by the extracted text.
#[must_use]
pub fn provenance_text(filename: &str, text: &str) -> String {
    format!("[File: {filename}]\n{text}")
}

/// Note sent in place of a document we could not read.
#[must_use]
pub fn fallback_text(filename: &str, kind: MediaKind) -> String {
    format!("[File: {filename}] Text extraction was not possible for this file ({kind}).")
}

/// Turns uploads into content segments.
///
/// `normalize` is synchronous and CPU bound (image recompression, PDF
/// parsing); run it on a blocking thread.
#[derive(Debug, Clone)]
pub struct Normalizer {
    budget: ImageBudget,
    extractors: ExtractorTable,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(ImageBudget::default(), ExtractorTable::default())
    }
}

impl Normalizer {
    #[must_use]
    pub fn new(budget: ImageBudget, extractors: ExtractorTable) -> Self {
        Self { budget, extractors }
    }

    #[must_use]
    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(
            ImageBudget::from(config),
            ExtractorTable::new(config.max_extracted_chars),
        )
    }

    /// Build segments from a prompt and uploads, in upload order.
    ///
    /// Documents that cannot be read become a fallback note; uploads that
    /// cannot be used at all (empty, undecodable image, unreachable budget)
    /// are skipped and left out of `processed`.
    #[must_use]
    pub fn normalize(&self, prompt: &str, artifacts: Vec<UploadArtifact>) -> NormalizedContent {
        let mut content = NormalizedContent::default();

        let prompt = prompt.trim();
        if !prompt.is_empty() {
            content.segments.push(ContentSegment::text(prompt));
        }

        for artifact in artifacts {
            match self.normalize_artifact(&artifact) {
                Ok(segment) => {
                    content.segments.push(segment);
                    content.processed.push(artifact.filename);
                },
                Err(e) => {
                    warn!(
                        filename = %artifact.filename,
                        bytes = artifact.bytes.len(),
                        error = %e,
                        "skipping upload"
                    );
                },
            }
        }

        debug!(
            segments = content.segments.len(),
            processed = content.processed.len(),
            "normalized upload"
        );
        content
    }

    fn normalize_artifact(&self, artifact: &UploadArtifact) -> relay_media::Result<ContentSegment> {
        if artifact.bytes.is_empty() {
            return Err(relay_media::Error::invalid_input("empty upload"));
        }

        let kind = detect_kind(artifact.declared_media_type.as_deref(), &artifact.filename);
        debug!(filename = %artifact.filename, %kind, bytes = artifact.bytes.len(), "normalizing upload");

        match kind {
            MediaKind::Image => {
                let fitted = fit_to_budget(&artifact.bytes, &self.budget)?;
                debug!(
                    filename = %artifact.filename,
                    recompressed = fitted.recompressed,
                    attempts = fitted.attempts,
                    "image segment ready"
                );
                Ok(ContentSegment::image(fitted.media_type, fitted.data))
            },
            MediaKind::Document(doc) => Ok(ContentSegment::text(self.document_text(artifact, doc))),
            MediaKind::Binary => Ok(ContentSegment::text(fallback_text(&artifact.filename, kind))),
        }
    }

    fn document_text(&self, artifact: &UploadArtifact, kind: DocumentKind) -> String {
        match self.extractors.extract(&artifact.bytes, kind) {
            Ok(text) if !text.trim().is_empty() => provenance_text(&artifact.filename, &text),
            Ok(_) => {
                debug!(filename = %artifact.filename, %kind, "extraction produced no text");
                fallback_text(&artifact.filename, MediaKind::Document(kind))
            },
            Err(e) => {
                warn!(filename = %artifact.filename, %kind, error = %e, "text extraction failed");
                fallback_text(&artifact.filename, MediaKind::Document(kind))
            },
        }
    }
}
