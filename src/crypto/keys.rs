//! Key-encapsulation boundary.
//!
//! The link only consumes a fixed-length symmetric session key. How that
//! key reaches both ends is pluggable through [`KeyEncapsulation`]:
//! a preshared key, or an X25519 DHKEM-style wrap. A post-quantum KEM can
//! be slotted in behind the same trait.

use x25519_dalek::{
    EphemeralSecret as DalekEphemeral, PublicKey as DalekPublic, StaticSecret as DalekStatic,
};
use zeroize::ZeroizeOnDrop;

use crate::crypto::{AeadKey, Hkdf, PUBLIC_KEY_SIZE};
use crate::error::{Error, Result};

/// HKDF salt for the X25519 wrap.
const KEM_SALT: &[u8] = b"milcodec/kem/x25519/v1";

/// A freshly generated session key together with its wrapped form.
pub struct Encapsulated {
    /// Bytes to hand to the peer (empty for preshared keys)
    pub ciphertext: Vec<u8>,
    /// The session key the peer will recover
    pub key: AeadKey,
}

/// Produce and recover per-session symmetric keys.
pub trait KeyEncapsulation: Send + Sync {
    /// Wrap a session key for the holder of `recipient_public`.
    fn encapsulate(&self, recipient_public: &[u8]) -> Result<Encapsulated>;

    /// Recover the session key from the peer's wrapped bytes.
    fn decapsulate(&self, ciphertext: &[u8]) -> Result<AeadKey>;
}

/// A key both ends already hold. Nothing travels on the wire.
pub struct PresharedKey(AeadKey);

impl PresharedKey {
    /// Wrap an existing key.
    pub fn new(key: AeadKey) -> Self {
        Self(key)
    }
}

impl KeyEncapsulation for PresharedKey {
    fn encapsulate(&self, _recipient_public: &[u8]) -> Result<Encapsulated> {
        Ok(Encapsulated {
            ciphertext: Vec::new(),
            key: self.0.clone(),
        })
    }

    fn decapsulate(&self, ciphertext: &[u8]) -> Result<AeadKey> {
        if !ciphertext.is_empty() {
            return Err(Error::InvalidMessage(
                "preshared key expects an empty encapsulation".into(),
            ));
        }
        Ok(self.0.clone())
    }
}

/// A static (long-term) X25519 secret key.
///
/// Automatically zeroized when dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct StaticSecret(DalekStatic);

impl StaticSecret {
    /// Generate a new random static secret.
    pub fn random() -> Self {
        Self(DalekStatic::random_from_rng(rand::thread_rng()))
    }

    /// Create from raw bytes.
    ///
    /// # Security
    ///
    /// The input bytes should come from a cryptographically secure source.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(DalekStatic::from(bytes))
    }
}

impl From<&StaticSecret> for PublicKey {
    fn from(secret: &StaticSecret) -> Self {
        PublicKey(DalekPublic::from(&secret.0))
    }
}

/// An X25519 public key.
///
/// Safe to share publicly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(DalekPublic);

impl PublicKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(DalekPublic::from(bytes))
    }

    /// Parse from a slice of exactly [`PUBLIC_KEY_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| Error::Buffer {
            expected: PUBLIC_KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self::from_bytes(arr))
    }

    /// Get the raw bytes of this public key.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }
}

/// X25519 key encapsulation (ephemeral-static DH, HKDF-SHA256).
///
/// The encapsulation is the 32-byte ephemeral public key.
pub struct X25519Kem {
    secret: StaticSecret,
    public: PublicKey,
}

impl X25519Kem {
    /// Build from this node's static secret.
    pub fn new(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// This node's public key, to be published to senders.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    fn derive(
        shared: &x25519_dalek::SharedSecret,
        ephemeral: &PublicKey,
        recipient: &PublicKey,
    ) -> Result<AeadKey> {
        if !shared.was_contributory() {
            return Err(Error::crypto("non-contributory X25519 agreement"));
        }
        let info = [ephemeral.as_bytes().as_slice(), recipient.as_bytes().as_slice()].concat();
        Hkdf::new(Some(KEM_SALT), shared.as_bytes()).derive_aead_key(&info)
    }
}

impl KeyEncapsulation for X25519Kem {
    fn encapsulate(&self, recipient_public: &[u8]) -> Result<Encapsulated> {
        let recipient = PublicKey::from_slice(recipient_public)?;

        let ephemeral = DalekEphemeral::random_from_rng(rand::thread_rng());
        let ephemeral_public = PublicKey(DalekPublic::from(&ephemeral));
        let shared = ephemeral.diffie_hellman(&recipient.0);

        let key = Self::derive(&shared, &ephemeral_public, &recipient)?;
        Ok(Encapsulated {
            ciphertext: ephemeral_public.as_bytes().to_vec(),
            key,
        })
    }

    fn decapsulate(&self, ciphertext: &[u8]) -> Result<AeadKey> {
        let ephemeral_public = PublicKey::from_slice(ciphertext)?;
        let shared = self.secret.0.diffie_hellman(&ephemeral_public.0);
        Self::derive(&shared, &ephemeral_public, &self.public)
    }
}
