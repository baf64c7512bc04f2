//! Cryptographic layer for command payloads.
//!
//! This module provides:
//! - ChaCha20-Poly1305 AEAD with detached tags
//! - PBKDF2-HMAC-SHA256 passphrase key derivation and HKDF expansion
//! - A key-encapsulation boundary (preshared key or X25519)
//! - A guarded key vault with fail-closed wipe semantics
//! - The crypto engine the link pipeline drives
//!
//! All secret material is zeroized on drop or on wipe.

mod aead;
mod engine;
mod envelope;
mod kdf;
mod keys;
mod random;
mod vault;

pub use aead::{Aead, AeadKey, Nonce, Tag};
pub use engine::{CryptoEngine, Sealed};
pub use envelope::{open_with_passphrase, seal_with_passphrase, Envelope};
pub use kdf::{derive_passphrase_key, Hkdf, Salt};
pub use keys::{Encapsulated, KeyEncapsulation, PresharedKey, PublicKey, StaticSecret, X25519Kem};
pub use random::SecureRandom;
pub use vault::{KeyStatus, KeyVault};

/// Size of symmetric keys in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of AEAD nonce in bytes (96 bits for ChaCha20-Poly1305)
pub const NONCE_SIZE: usize = 12;

/// Size of AEAD authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of the passphrase salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of X25519 public keys in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// PBKDF2 iteration count used for session keys.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Lowest iteration count accepted from callers or envelopes.
pub const MIN_PBKDF2_ITERATIONS: u32 = 10_000;

/// Highest iteration count accepted from an envelope header.
pub const MAX_PBKDF2_ITERATIONS: u32 = 10_000_000;
