//! JPEG frame decoding.

use image::codecs::jpeg::JpegDecoder;
use image::{DynamicImage, RgbaImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("JPEG decode failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Decode one received frame into an RGBA bitmap.
///
/// Dimensions come from the image itself; no resolution is enforced.
pub fn decode_frame(data: &[u8]) -> Result<RgbaImage, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let decoder = JpegDecoder::new(Cursor::new(data))?;
    let image = DynamicImage::from_decoder(decoder)?;
    Ok(image.into_rgba8())
}
