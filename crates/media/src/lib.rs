//! Media handling for uploads: kind detection, image budget fitting and
//! document text extraction.

pub mod error;
pub mod extract;
pub mod image_ops;
pub mod mime;

pub use {
    error::{Error, Result},
    extract::{ExtractorTable, TextExtractor},
    image_ops::{FittedImage, ImageBudget, fit_to_budget},
    mime::{DocumentKind, MediaKind, detect_kind},
};
