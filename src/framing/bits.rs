//! Byte/bit conversion. Most significant bit first, on both ends.

use crate::error::FrameError;

/// Expand bytes into bits (`0` or `1`), MSB first.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1);
        }
    }
    bits
}

/// Pack bits into bytes, MSB first. Any non-zero bit value counts as `1`.
///
/// # Errors
///
/// [`FrameError::PartialByte`] if the bit count is not a multiple of 8.
pub fn bits_to_bytes(bits: &[u8]) -> Result<Vec<u8>, FrameError> {
    if bits.len() % 8 != 0 {
        return Err(FrameError::PartialByte(bits.len()));
    }
    Ok(bits
        .chunks_exact(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | u8::from(b != 0)))
        .collect())
}

/// Read a big-endian unsigned integer from the first `width` bits.
pub(crate) fn read_uint(bits: &[u8], width: usize) -> Option<u64> {
    if width > 64 || bits.len() < width {
        return None;
    }
    Some(bits[..width].iter().fold(0u64, |acc, &b| (acc << 1) | u64::from(b != 0)))
}
