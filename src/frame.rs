//! Decoded frame container.
//!
//! The engine consumes a decoded, uncompressed raster:
//!
//! - `Frame`: owned H×W×3 8-bit buffer in RGB order, row-major.
//! - Dimensions are validated at construction; a zero-area frame never reaches
//!   a detector.
//!
//! Frames are borrowed by the engine for the duration of one call and are never
//! retained past it.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

/// Upper bound on accepted frame dimensions (per side).
pub const MAX_FRAME_SIDE: u32 = 8192;

// ----------------------------------------------------------------------------
// Frame: validated RGB raster
// ----------------------------------------------------------------------------

/// Validated RGB frame. Construction fails on zero or mismatched dimensions.
#[derive(Clone)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Wrap a tightly packed RGB buffer.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        check_dimensions(width, height)?;
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self { image })
    }

    /// Wrap an already decoded `image` buffer.
    pub fn from_rgb_image(image: RgbImage) -> Result<Self> {
        check_dimensions(image.width(), image.height())?;
        Ok(Self { image })
    }

    /// Decode an encoded image (JPEG/PNG) into an RGB frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(anyhow!("empty image payload"));
        }
        let decoded = image::load_from_memory(bytes).context("decode image payload")?;
        Self::from_rgb_image(decoded.to_rgb8())
    }

    /// Read and decode an image file.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        Self::decode(&bytes).with_context(|| format!("invalid image {}", path.display()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Total pixel count (`width * height`).
    pub fn area(&self) -> u64 {
        self.image.width() as u64 * self.image.height() as u64
    }

    /// Borrow the underlying raster.
    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame must have positive dimensions, got {}x{}", width, height));
    }
    if width > MAX_FRAME_SIDE || height > MAX_FRAME_SIDE {
        return Err(anyhow!(
            "frame {}x{} exceeds maximum side {}",
            width,
            height,
            MAX_FRAME_SIDE
        ));
    }
    Ok(())
}
