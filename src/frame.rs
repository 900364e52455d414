//! Decoded image container.
//!
//! `DecodedImage` is the only thing acquisition hands back on success. It is an owned
//! RGB8 raster with non-zero dimensions. There is no partially-decoded state: the
//! constructors reject empty rasters and short pixel buffers.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// Owned in-memory raster, RGB8, row-major.
///
/// Lives for a single request. Nothing in the crate caches or persists it.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedImage {
    pixels: RgbImage,
}

impl DecodedImage {
    /// Wrap an RGB raster. Fails on zero width or height.
    pub fn from_rgb(pixels: RgbImage) -> Result<Self> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(anyhow!(
                "decoded image has zero dimension ({}x{})",
                pixels.width(),
                pixels.height()
            ));
        }
        Ok(Self { pixels })
    }

    /// Build from a tightly packed RGB buffer (3 bytes per pixel, no row padding).
    pub fn from_raw_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "rgb buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            ));
        }
        let pixels = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("rgb buffer does not match {}x{}", width, height))?;
        Self::from_rgb(pixels)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn into_rgb(self) -> RgbImage {
        self.pixels
    }
}
