//! The crypto engine driven by the link pipeline.
//!
//! Owns the [`KeyVault`] (shared with the Protocol Zero controller) and the
//! nonce sequence. Nonces are a random 4-byte engine prefix plus a 64-bit
//! counter that starts at a random point in its lower half, so engines
//! re-derived from the same passphrase and salt start 95 random bits apart.
//! The counter refuses to wrap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::crypto::{
    derive_passphrase_key, AeadKey, KeyEncapsulation, KeyVault, Nonce, Salt, SecureRandom, Tag,
};
use crate::error::{Error, Result};

/// Output of [`CryptoEngine::encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Ciphertext, same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// Detached authentication tag
    pub tag: Tag,
    /// Nonce used for this message
    pub nonce: Nonce,
}

/// Authenticated encryption over the session key.
pub struct CryptoEngine {
    vault: Arc<KeyVault>,
    nonce_prefix: [u8; 4],
    next_counter: AtomicU64,
}

impl CryptoEngine {
    /// Create an engine over an already derived or unwrapped key.
    pub fn new(key: AeadKey) -> Self {
        Self::with_vault(Arc::new(KeyVault::new(key)))
    }

    /// Create an engine over a shared vault.
    pub fn with_vault(vault: Arc<KeyVault>) -> Self {
        Self {
            vault,
            nonce_prefix: SecureRandom::bytes(),
            // At least 2^63 messages before exhaustion
            next_counter: AtomicU64::new(SecureRandom::u64() >> 1),
        }
    }

    /// Derive the session key from a passphrase. Slow by design.
    pub fn from_passphrase(passphrase: &[u8], salt: &Salt, iterations: u32) -> Result<Self> {
        let key = derive_passphrase_key(passphrase, salt, iterations)?;
        tracing::info!(iterations, "derived session key from passphrase");
        Ok(Self::new(key))
    }

    /// Recover the session key through a key-encapsulation mechanism.
    pub fn from_encapsulation(kem: &dyn KeyEncapsulation, encapsulated: &[u8]) -> Result<Self> {
        let key = kem.decapsulate(encapsulated)?;
        Ok(Self::new(key))
    }

    /// The vault holding this engine's key.
    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    ///
    /// # Errors
    ///
    /// [`Error::KeyWiped`] after Protocol Zero; [`Error::Crypto`] if the
    /// nonce space is exhausted.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
        self.vault.with_cipher(|aead| {
            let nonce = self.next_nonce()?;
            let (ciphertext, tag) = aead.seal_detached(&nonce, plaintext, aad)?;
            Ok(Sealed {
                ciphertext,
                tag,
                nonce,
            })
        })
    }

    /// Verify and decrypt.
    ///
    /// # Errors
    ///
    /// [`Error::KeyWiped`] after Protocol Zero, [`Error::Authentication`] on
    /// any tag mismatch. Unauthenticated bytes are never returned.
    pub fn decrypt(&self, sealed: &Sealed, aad: &[u8]) -> Result<Vec<u8>> {
        self.vault.with_cipher(|aead| {
            aead.open_detached(&sealed.nonce, &sealed.ciphertext, &sealed.tag, aad)
        })
    }

    fn next_nonce(&self) -> Result<Nonce> {
        let counter = self
            .next_counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_add(1))
            .map_err(|_| Error::crypto("nonce space exhausted; rekey required"))?;
        Ok(Nonce::new(self.nonce_prefix, counter))
    }
}
