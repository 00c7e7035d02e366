//! Image acquisition: the raw photo as captured or picked, before any processing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::PreprocessError;

/// Maximum input image size (in bytes) before rejecting.
/// Prevents OOM on corrupt/adversarial files.
pub const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
pub const MIN_IMAGE_BYTES: usize = 67;

/// Maximum decoded source resolution, checked from the header before decoding.
pub const MAX_SOURCE_PIXELS: u64 = 40_000_000;

/// Longest edge a prepared image may have.
pub const MAX_OUTPUT_EDGE: u32 = 4096;

/// Where a raw image came from. Used for logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOrigin {
    File(PathBuf),
    Memory,
}

/// Undecoded image bytes at arbitrary resolution and format.
///
/// Immutable after acquisition; the preprocessor always produces a new
/// buffer and never hands these bytes to a classifier directly. Clones
/// share the buffer.
#[derive(Debug, Clone)]
pub struct RawImage {
    bytes: Arc<[u8]>,
    origin: ImageOrigin,
}

impl RawImage {
    /// Read a photo from disk (camera output or a gallery pick).
    pub fn from_path(path: &Path) -> Result<Self, PreprocessError> {
        let bytes = std::fs::read(path)?;
        validate_image_bytes(&bytes)?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Image acquired from file");
        Ok(Self {
            bytes: bytes.into(),
            origin: ImageOrigin::File(path.to_path_buf()),
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PreprocessError> {
        validate_image_bytes(&bytes)?;
        Ok(Self {
            bytes: bytes.into(),
            origin: ImageOrigin::Memory,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn origin(&self) -> &ImageOrigin {
        &self.origin
    }
}

/// Reject byte buffers that cannot possibly be a usable photo.
pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), PreprocessError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(PreprocessError::InvalidSource(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(PreprocessError::InvalidSource(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Reject decoded resolutions too large to process in memory.
pub fn validate_source_dimensions(width: u32, height: u32) -> Result<(), PreprocessError> {
    if width == 0 || height == 0 {
        return Err(PreprocessError::Decode(
            "source image dimensions must be greater than zero".into(),
        ));
    }
    if u64::from(width) * u64::from(height) > MAX_SOURCE_PIXELS {
        return Err(PreprocessError::InvalidSource(format!(
            "Image resolution {width}x{height} exceeds {} megapixels",
            MAX_SOURCE_PIXELS / 1_000_000
        )));
    }
    Ok(())
}
