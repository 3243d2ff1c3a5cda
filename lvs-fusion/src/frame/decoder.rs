//! Frame decoder
//!
//! Converts a transport payload (base64, optionally `data:image/...;base64,`
//! prefixed) into a [`Frame`]. Pure and stateless; CPU-bound, so callers run
//! it on the blocking pool.

use super::Frame;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

const DATA_URL_MARKER: &str = "base64,";

/// Why a payload could not become a frame
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("empty payload")]
    Empty,

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a transport-encoded image payload into a raw pixel frame
pub fn decode_frame(payload: &str) -> Result<Frame, FrameDecodeError> {
    let encoded = match payload.rfind(DATA_URL_MARKER) {
        Some(idx) => &payload[idx + DATA_URL_MARKER.len()..],
        None => payload,
    };
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(FrameDecodeError::Empty);
    }

    let bytes = STANDARD.decode(encoded)?;
    let image = image::load_from_memory(&bytes)?;
    Ok(Frame::new(image.to_rgb8()))
}
