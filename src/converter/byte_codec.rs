//! Fixed-width encodings for backends without a native double

use crate::{Error, Result};

/// IEEE-754 bit pattern, big-endian.
pub fn double_to_bytes(value: f64) -> [u8; 8] {
    value.to_bits().to_be_bytes()
}

pub fn bytes_to_double(column: &str, bytes: &[u8]) -> Result<f64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| Error::Decode {
        column: column.to_string(),
        reason: format!("double needs 8 bytes, found {}", bytes.len()),
    })?;
    Ok(f64::from_bits(u64::from_be_bytes(raw)))
}
