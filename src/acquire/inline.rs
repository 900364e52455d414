//! Inline (base64) image payloads.
//!
//! Payloads arrive either bare (`iVBORw0KGgo...`) or as data URLs
//! (`data:image/png;base64,iVBORw0KGgo...`). Everything up to and including the
//! first comma is metadata and is discarded before decoding.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InlineError {
    #[error("inline image payload is empty")]
    Empty,

    #[error("invalid base64 encoding: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("inline image is too large: {0} bytes (max: {1} bytes)")]
    TooLarge(usize, usize),
}

/// Drop an optional metadata prefix up to the first `,`.
pub fn strip_metadata(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    }
}

/// Strip metadata and base64-decode the remainder.
pub fn decode_payload(payload: &str, max_bytes: usize) -> Result<Vec<u8>, InlineError> {
    let encoded = strip_metadata(payload);
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(InlineError::Empty);
    }

    // 4 base64 chars carry 3 bytes; reject before allocating the decoded buffer.
    let estimated = compact.len() / 4 * 3;
    if estimated > max_bytes.saturating_add(3) {
        return Err(InlineError::TooLarge(estimated, max_bytes));
    }

    let bytes = STANDARD.decode(compact.as_bytes())?;
    if bytes.is_empty() {
        return Err(InlineError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(InlineError::TooLarge(bytes.len(), max_bytes));
    }
    Ok(bytes)
}
