//! Authenticated Encryption with Associated Data (AEAD).
//!
//! Uses ChaCha20-Poly1305 with a detached 128-bit tag so the framer can
//! place ciphertext and tag in separate wire fields. Tag verification is
//! constant-time inside the cipher; a mismatch surfaces only as
//! [`Error::Authentication`].

use std::fmt;

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};

/// A 256-bit symmetric key for AEAD operations.
///
/// Automatically zeroized when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Create a new AEAD key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a key from a slice, which must be exactly [`KEY_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| Error::Buffer {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    ///
    /// Handle with care - this is secret key material.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AeadKey(<redacted>)")
    }
}

/// A nonce (number used once) for AEAD operations.
///
/// Layout: 4-byte per-engine prefix followed by a 64-bit big-endian
/// message counter. Must be unique for each encryption under one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Build a nonce from a prefix and a counter value.
    pub fn new(prefix: [u8; 4], counter: u64) -> Self {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..4].copy_from_slice(&prefix);
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        Self(nonce)
    }

    /// Create a nonce from raw bytes.
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Get the counter portion (for diagnostics).
    pub fn counter(&self) -> u64 {
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&self.0[4..]);
        u64::from_be_bytes(counter)
    }
}

/// Detached Poly1305 authentication tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tag([u8; TAG_SIZE]);

impl Tag {
    /// Create a tag from raw bytes.
    pub fn from_bytes(bytes: [u8; TAG_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw tag bytes.
    pub fn as_bytes(&self) -> &[u8; TAG_SIZE] {
        &self.0
    }
}

/// ChaCha20-Poly1305 AEAD cipher.
pub struct Aead {
    cipher: ChaCha20Poly1305,
}

impl Aead {
    /// Create a new AEAD instance with the given key.
    pub fn new(key: &AeadKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    /// Encrypt plaintext, returning the ciphertext and a detached tag.
    ///
    /// # Arguments
    ///
    /// * `nonce` - Must be unique for this key
    /// * `plaintext` - Data to encrypt
    /// * `aad` - Additional data to authenticate (but not encrypt)
    pub fn seal_detached(
        &self,
        nonce: &Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, Tag)> {
        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce.as_bytes().into(), aad, &mut buffer)
            .map_err(|_| Error::crypto("encryption failed"))?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(tag.as_slice());
        Ok((buffer, Tag(tag_bytes)))
    }

    /// Verify the tag and decrypt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] on any mismatch (wrong key, tampered
    /// ciphertext, tag, nonce or AAD). No detail about the mismatch is exposed.
    pub fn open_detached(
        &self,
        nonce: &Nonce,
        ciphertext: &[u8],
        tag: &Tag,
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let mut buffer = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(
                nonce.as_bytes().into(),
                aad,
                &mut buffer,
                chacha20poly1305::Tag::from_slice(tag.as_bytes()),
            )
            .map_err(|_| {
                buffer.zeroize();
                Error::Authentication
            })?;
        Ok(buffer)
    }
}
