//! PNG and base64 encoding of generated images

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::error::{AppError, Result};

pub const PNG_MIME_TYPE: &str = "image/png";

/// Encode an image as PNG bytes
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Encode binary data to base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode base64 string to binary data, accepting a data URL
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    let data = match encoded.split_once(',') {
        Some((_, payload)) => payload,
        None => encoded,
    };

    STANDARD
        .decode(data.trim())
        .map_err(|e| AppError::InvalidRequest(format!("Invalid base64 data: {}", e)))
}

/// Wrap an already encoded PNG payload in a data URL
pub fn png_data_url(b64: &str) -> String {
    format!("data:{};base64,{}", PNG_MIME_TYPE, b64)
}
