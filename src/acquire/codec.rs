//! Image codec capability backed by the `image` crate.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::DecodedImage;

/// JPEG quality used when a stream frame is re-encoded for display.
pub const FRAME_JPEG_QUALITY: u8 = 85;

/// Decode encoded blobs into rasters and encode rasters back to JPEG.
pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage>;

    fn encode_jpeg(&self, image: &DecodedImage, quality: u8) -> Result<Vec<u8>>;
}

/// Default codec. Format is sniffed from magic bytes; output is always RGB8.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageCrateCodec;

impl ImageCodec for ImageCrateCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage> {
        if bytes.is_empty() {
            return Err(anyhow!("image data is empty"));
        }
        let format = image::guess_format(bytes).context("detect image format")?;
        let decoded =
            image::load_from_memory_with_format(bytes, format).context("decode image")?;
        DecodedImage::from_rgb(decoded.into_rgb8())
    }

    fn encode_jpeg(&self, image: &DecodedImage, quality: u8) -> Result<Vec<u8>> {
        let (width, height) = image.dimensions();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(image.as_rgb().as_raw(), width, height, ExtendedColorType::Rgb8)
            .context("encode jpeg")?;
        Ok(out)
    }
}
