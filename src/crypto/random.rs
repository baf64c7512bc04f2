//! Secure random number generation.
//!
//! Provides cryptographically secure random bytes using the operating
//! system's entropy source.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::OsRng;

/// Cryptographically secure random number generator.
///
/// Wraps the OS-provided entropy source (e.g., /dev/urandom on Unix,
/// BCryptGenRandom on Windows).
pub struct SecureRandom;

impl SecureRandom {
    /// Fill a buffer with cryptographically secure random bytes.
    pub fn fill(dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }

    /// Generate a fixed-size array of random bytes.
    pub fn bytes<const N: usize>() -> [u8; N] {
        let mut buf = [0u8; N];
        OsRng.fill_bytes(&mut buf);
        buf
    }

    /// Generate a random u64.
    pub fn u64() -> u64 {
        OsRng.next_u64()
    }

    /// A fast ChaCha20 stream seeded from the OS, for bulk noise synthesis.
    pub fn stream_rng() -> ChaCha20Rng {
        ChaCha20Rng::from_seed(Self::bytes())
    }
}
