//! Bit framing.
//!
//! Turns an encrypted message into a self-delimiting bitstream and back.
//! The receiver only needs the first 16 bits (the length prefix) to know
//! how many more bits to demodulate.

mod bits;
mod frame;

pub use bits::{bits_to_bytes, bytes_to_bits};
pub use frame::{deframe, frame, Frame, Message, MessageHeader, Priority};

pub(crate) use bits::read_uint;

use crate::crypto::{NONCE_SIZE, TAG_SIZE};

/// Bytes before the ciphertext: length, priority, sequence, timestamp, nonce.
pub const HEADER_LEN: usize = 2 + 1 + 8 + 8 + NONCE_SIZE;

/// Width of the length prefix in bits.
pub const LENGTH_PREFIX_BITS: usize = 16;

/// Largest accepted ciphertext + tag length.
pub const MAX_BODY_LEN: usize = 1024;

/// Largest plaintext that fits in one frame.
pub const MAX_PAYLOAD_LEN: usize = MAX_BODY_LEN - TAG_SIZE;

/// Total frame length in bits for a given length prefix.
pub fn frame_bits_for(body_len: usize) -> usize {
    (HEADER_LEN + body_len) * 8
}
