//! Image processing operations for LLM-ready media.
//!
//! Every image sent to the model is carried inline as base64, and the
//! provider rejects payloads above its per-image limit. [`fit_to_budget`]
//! guarantees the encoded string stays under [`ImageBudget::max_encoded_bytes`]
//! by re-encoding as JPEG at falling quality and shrinking the image when
//! quality alone is not enough.

use std::io::Cursor;

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    image::{
        DynamicImage, GenericImageView, ImageFormat, ImageReader, Rgb, RgbImage,
        codecs::jpeg::JpegEncoder, imageops::FilterType,
    },
    relay_config::MediaConfig,
    tracing::{debug, trace},
};

use crate::error::{Error, Result};

/// Maximum encoded size for a single inline image (5 MiB).
pub const DEFAULT_MAX_ENCODED_BYTES: usize = 5 * 1024 * 1024;

/// Limits and knobs for the recompression loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBudget {
    /// Upper bound on the base64 string length.
    pub max_encoded_bytes: usize,
    pub start_quality: u8,
    pub min_quality: u8,
    pub quality_step: u8,
    /// Applied to both dimensions once quality hits the floor.
    pub downscale_factor: f32,
    /// Total JPEG encode attempts before giving up.
    pub max_iterations: u32,
    /// Images are never shrunk below this on their longer side.
    pub min_dimension: u32,
}

impl Default for ImageBudget {
    fn default() -> Self {
        Self {
            max_encoded_bytes: DEFAULT_MAX_ENCODED_BYTES,
            start_quality: 95,
            min_quality: 20,
            quality_step: 5,
            downscale_factor: 0.75,
            max_iterations: 64,
            min_dimension: 16,
        }
    }
}

impl From<&MediaConfig> for ImageBudget {
    fn from(config: &MediaConfig) -> Self {
        Self {
            max_encoded_bytes: config.max_image_bytes,
            start_quality: config.jpeg_start_quality,
            min_quality: config.jpeg_min_quality,
            quality_step: config.jpeg_quality_step,
            downscale_factor: config.downscale_factor,
            max_iterations: config.max_recompress_iterations,
            min_dimension: config.min_dimension,
        }
    }
}

/// An image that is ready to be placed in a content segment.
#[derive(Debug, Clone)]
pub struct FittedImage {
    pub media_type: String,
    /// Base64 payload, never longer than the budget it was fitted to.
    pub data: String,
    pub width: u32,
    pub height: u32,
    /// `false` when the upload passed through untouched.
    pub recompressed: bool,
    /// JPEG encode attempts spent.
    pub attempts: u32,
}

/// Image metadata.
#[derive(Debug, Clone)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Option<ImageFormat>,
}

/// Get metadata about an image without fully decoding it.
pub fn get_image_metadata(data: &[u8]) -> Result<ImageMetadata> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| Error::external("failed to guess image format", e))?;

    let format = reader.format();
    let (width, height) = reader.into_dimensions()?;

    Ok(ImageMetadata {
        width,
        height,
        format,
    })
}

/// Length of the standard padded base64 encoding of `raw_len` bytes.
#[must_use]
pub fn encoded_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3) * 4
}

/// Fit an image into `budget`.
///
/// Images in a provider-supported format whose encoding already fits pass
/// through with their detected media type. Everything else is decoded,
/// flattened onto white and recompressed as JPEG.
pub fn fit_to_budget(data: &[u8], budget: &ImageBudget) -> Result<FittedImage> {
    if data.is_empty() {
        return Err(Error::invalid_input("empty image upload"));
    }

    let meta = get_image_metadata(data)?;
    let passthrough_type = inline_media_type(meta.format);

    if let Some(media_type) = passthrough_type
        && encoded_len(data.len()) <= budget.max_encoded_bytes
    {
        debug!(
            bytes = data.len(),
            media_type, "image within budget, passing through"
        );
        return Ok(FittedImage {
            media_type: media_type.to_string(),
            data: STANDARD.encode(data),
            width: meta.width,
            height: meta.height,
            recompressed: false,
            attempts: 0,
        });
    }

    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| Error::external("failed to guess image format", e))?
        .decode()?;

    let fitted = recompress(flatten_onto_white(&img), budget)?;
    debug!(
        original_bytes = data.len(),
        encoded_bytes = fitted.data.len(),
        width = fitted.width,
        height = fitted.height,
        attempts = fitted.attempts,
        "image recompressed to fit budget"
    );
    Ok(fitted)
}

fn recompress(mut img: DynamicImage, budget: &ImageBudget) -> Result<FittedImage> {
    let step = budget.quality_step.max(1);
    let floor = budget.min_quality.clamp(1, 100);
    let start = budget.start_quality.clamp(floor, 100);

    let mut quality = start;
    let mut attempts = 0;

    loop {
        if attempts >= budget.max_iterations {
            return Err(Error::BudgetUnreachable {
                budget: budget.max_encoded_bytes,
                reason: "iteration cap reached",
            });
        }
        attempts += 1;

        let jpeg = encode_jpeg_with_quality(&img, quality)?;
        trace!(quality, bytes = jpeg.len(), "jpeg attempt");

        // Padded base64 length is exact, so this is the post-encoding check.
        if encoded_len(jpeg.len()) <= budget.max_encoded_bytes {
            let (width, height) = img.dimensions();
            return Ok(FittedImage {
                media_type: "image/jpeg".to_string(),
                data: STANDARD.encode(&jpeg),
                width,
                height,
                recompressed: true,
                attempts,
            });
        }

        if quality > floor {
            quality = quality.saturating_sub(step).max(floor);
            continue;
        }

        img = downscale(&img, budget)?;
        quality = start;
    }
}

fn downscale(img: &DynamicImage, budget: &ImageBudget) -> Result<DynamicImage> {
    let (width, height) = img.dimensions();
    if width.max(height) <= budget.min_dimension {
        return Err(Error::BudgetUnreachable {
            budget: budget.max_encoded_bytes,
            reason: "minimum dimension reached",
        });
    }

    let scale = |v: u32| -> u32 {
        let scaled = (f64::from(v) * f64::from(budget.downscale_factor)).floor();
        // Dimensions are u32 to begin with, so the float is in range.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = scaled as u32;
        scaled.clamp(1, v.saturating_sub(1).max(1))
    };
    let (new_width, new_height) = (scale(width), scale(height));
    debug!(width, height, new_width, new_height, "downscaling image");
    Ok(img.resize_exact(new_width, new_height, FilterType::Triangle))
}

/// Composite any alpha onto a white background and drop to 8-bit RGB.
fn flatten_onto_white(img: &DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return DynamicImage::ImageRgb8(img.to_rgb8());
    }

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut out = RgbImage::new(width, height);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u16::from(a);
        let blend = |c: u8| {
            let mixed = (u16::from(c) * alpha + 255 * (255 - alpha) + 127) / 255;
            u8::try_from(mixed).unwrap_or(u8::MAX)
        };
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    DynamicImage::ImageRgb8(out)
}

/// Encode image as JPEG with specified quality.
fn encode_jpeg_with_quality(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut output = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut output, quality);
    img.write_with_encoder(encoder)?;
    Ok(output.into_inner())
}

/// Media type for formats the model accepts inline.
fn inline_media_type(format: Option<ImageFormat>) -> Option<&'static str> {
    match format {
        Some(ImageFormat::Jpeg) => Some("image/jpeg"),
        Some(ImageFormat::Png) => Some("image/png"),
        Some(ImageFormat::WebP) => Some("image/webp"),
        Some(ImageFormat::Gif) => Some("image/gif"),
        _ => None,
    }
}
