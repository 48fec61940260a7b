//! Data-URI <-> image conversion for the generate endpoint.

use base64::{prelude::BASE64_STANDARD, Engine};
use image::DynamicImage;
use std::io::Cursor;
use thiserror::Error;

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("Invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image data is empty")]
    Empty,

    #[error("Could not decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// Strips an optional `data:<mime>;base64,` header, keeping what follows the last comma.
pub fn strip_data_uri(data: &str) -> &str {
    data.rsplit(',').next().unwrap_or(data)
}

pub fn decode_image(data: &str) -> Result<DynamicImage, ImageDecodeError> {
    let bytes = BASE64_STANDARD.decode(strip_data_uri(data).trim())?;
    if bytes.is_empty() {
        return Err(ImageDecodeError::Empty);
    }
    Ok(image::load_from_memory(&bytes)?)
}

/// Encodes an image as PNG wrapped in a data URI.
pub fn encode_png_data_uri(img: &DynamicImage) -> anyhow::Result<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(format!("{}{}", PNG_DATA_URI_PREFIX, BASE64_STANDARD.encode(&bytes)))
}
