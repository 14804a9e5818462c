//! # Photo Validation
//!
//! Checks an uploaded payload before any quota is consumed: it must be small
//! enough and sniff as an image format the vision backend accepts.

use image::ImageFormat;
use tracing::{debug, info};

use crate::config::PhotoConfig;

/// Why an upload was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoRejection {
    TooLarge { size: usize, max: usize },
    TooSmall { size: usize },
    UnsupportedFormat(String),
    Unrecognized,
}

impl std::fmt::Display for PhotoRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhotoRejection::TooLarge { size, max } => {
                write!(f, "photo is {size} bytes, the maximum is {max}")
            }
            PhotoRejection::TooSmall { size } => {
                write!(f, "photo is only {size} bytes, too short to detect a format")
            }
            PhotoRejection::UnsupportedFormat(format) => write!(f, "unsupported image format {format}"),
            PhotoRejection::Unrecognized => write!(f, "payload is not a recognizable image"),
        }
    }
}

/// Validate an uploaded photo and return its detected format
pub fn validate_photo(bytes: &[u8], config: &PhotoConfig) -> Result<ImageFormat, PhotoRejection> {
    if bytes.len() > config.max_bytes {
        info!(size = bytes.len(), max = config.max_bytes, "Photo rejected, too large");
        return Err(PhotoRejection::TooLarge {
            size: bytes.len(),
            max: config.max_bytes,
        });
    }
    if bytes.len() < config.min_format_bytes {
        return Err(PhotoRejection::TooSmall { size: bytes.len() });
    }

    match image::guess_format(bytes) {
        Ok(format) if is_supported_format(format) => {
            debug!(?format, size = bytes.len(), "Photo format detected");
            Ok(format)
        }
        Ok(format) => {
            info!(?format, "Photo rejected, unsupported format");
            Err(PhotoRejection::UnsupportedFormat(format!("{format:?}")))
        }
        Err(e) => {
            info!(error = %e, "Could not determine photo format");
            Err(PhotoRejection::Unrecognized)
        }
    }
}

/// Formats the vision backend accepts as image input
pub fn is_supported_format(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP | ImageFormat::Gif
    )
}

/// MIME type used in the data URI sent to the backend
pub fn mime_type(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Gif) => "image/gif",
        _ => "image/jpeg",
    }
}
