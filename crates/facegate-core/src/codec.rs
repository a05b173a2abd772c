//! Transport codecs: base64 photos in, base64 embedding descriptors out.
//!
//! Photos arrive as plain base64 or as data URIs (`data:image/jpeg;base64,...`);
//! everything up to the first comma is treated as a header and ignored.
//! Descriptors are the embedding's little-endian f32 bytes, base64-encoded.

use std::io::Cursor;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use image::{ImageReader, Limits, RgbImage};
use thiserror::Error;

use crate::types::Embedding;

/// Standard alphabet, tolerant of stripped padding on input; always pads on output.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const DEFAULT_MAX_IMAGE_DIM: u32 = 4096;
const F32_BYTES: usize = std::mem::size_of::<f32>();

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("image has no pixels ({width}x{height})")]
    ZeroSize { width: u32, height: u32 },
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to read image container: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Error, Debug, PartialEq)]
pub enum EmbeddingCodecError {
    #[error("descriptor is empty")]
    Empty,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("descriptor length {0} is not a multiple of 4 bytes")]
    Misaligned(usize),
}

/// Upper bounds applied while decoding an uploaded photo.
#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    /// Maximum width and height in pixels.
    pub max_dim: u32,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_dim: DEFAULT_MAX_IMAGE_DIM,
        }
    }
}

/// Return the base64 portion of a payload, dropping any `<header>,` prefix.
pub fn strip_data_uri(data: &str) -> &str {
    match data.split_once(',') {
        Some((_header, encoded)) => encoded,
        None => data,
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64.decode(compact)
}

/// Decode a base64 (optionally data-URI-prefixed) photo into an RGB raster.
pub fn decode_image(data: &str, limits: &DecodeLimits) -> Result<RgbImage, DecodeError> {
    let bytes = decode_base64(strip_data_uri(data))?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let mut image_limits = Limits::default();
    image_limits.max_image_width = Some(limits.max_dim);
    image_limits.max_image_height = Some(limits.max_dim);
    reader.limits(image_limits);

    let image = reader.decode()?;
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::ZeroSize {
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(image.into_rgb8())
}

/// Encode an embedding as base64 of its little-endian f32 bytes.
pub fn encode_embedding(embedding: &Embedding) -> String {
    let bytes: Vec<u8> = embedding
        .values
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    BASE64.encode(bytes)
}

/// Decode a descriptor produced by [`encode_embedding`].
pub fn decode_embedding(data: &str) -> Result<Embedding, EmbeddingCodecError> {
    let bytes = decode_base64(data)?;
    if bytes.is_empty() {
        return Err(EmbeddingCodecError::Empty);
    }
    if bytes.len() % F32_BYTES != 0 {
        return Err(EmbeddingCodecError::Misaligned(bytes.len()));
    }

    let values = bytes
        .chunks_exact(F32_BYTES)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Ok(Embedding::new(values))
}
