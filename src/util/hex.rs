//! Hex codec for kernel connection-table fields and trace dumps

use std::fmt::Write as _;

use thiserror::Error;

/// Hex decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    /// Input has an odd number of characters
    #[error("odd hex length: {0}")]
    OddLength(usize),

    /// Input does not decode to the expected number of bytes
    #[error("expected {expected} hex characters, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Input contains a character outside `[0-9a-fA-F]`
    #[error("invalid hex character {ch:?} at index {index}")]
    InvalidCharacter { ch: char, index: usize },
}

impl HexError {
    fn from_decode(e: hex::FromHexError, text_len: usize) -> Self {
        match e {
            hex::FromHexError::InvalidHexCharacter { c, index } => {
                Self::InvalidCharacter { ch: c, index }
            }
            hex::FromHexError::OddLength | hex::FromHexError::InvalidStringLength => {
                Self::OddLength(text_len)
            }
        }
    }
}

/// Decode hex character pairs (either case) into bytes.
///
/// # Errors
///
/// Returns `HexError` on odd-length input or non-hex characters.
pub fn hex_to_bytes(text: &str) -> Result<Vec<u8>, HexError> {
    if text.len() % 2 != 0 {
        return Err(HexError::OddLength(text.len()));
    }
    hex::decode(text).map_err(|e| HexError::from_decode(e, text.len()))
}

/// Decode hex into a fixed-size buffer, failing unless the length matches exactly.
///
/// # Errors
///
/// Returns `HexError` on length mismatch or non-hex characters.
pub fn hex_to_array<const N: usize>(text: &str) -> Result<[u8; N], HexError> {
    if text.len() != N * 2 {
        return Err(HexError::LengthMismatch {
            expected: N * 2,
            actual: text.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(text, &mut out).map_err(|e| HexError::from_decode(e, text.len()))?;
    Ok(out)
}

/// Render bytes as an upper-case, space-separated dump (`"AB CD "`).
#[must_use]
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for b in bytes {
        let _ = write!(out, "{b:02X} ");
    }
    out
}
