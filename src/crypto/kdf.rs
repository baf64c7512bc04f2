//! Key Derivation Functions.
//!
//! Passphrases go through PBKDF2-HMAC-SHA256 (slow, salted, iterated).
//! Shared secrets from key agreement go through HKDF-SHA256.

use hkdf::Hkdf as HkdfImpl;
use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::{
    AeadKey, SecureRandom, KEY_SIZE, MAX_PBKDF2_ITERATIONS, MIN_PBKDF2_ITERATIONS, SALT_SIZE,
};
use crate::error::{Error, Result};

/// HKDF key derivation using SHA-256.
pub struct Hkdf {
    prk: HkdfImpl<Sha256>,
}

impl Hkdf {
    /// Create a new HKDF instance from input keying material.
    ///
    /// # Arguments
    ///
    /// * `salt` - Optional salt (recommended for better security)
    /// * `ikm` - Input keying material (e.g., shared secret from DH)
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        Self {
            prk: HkdfImpl::new(salt, ikm),
        }
    }

    /// Expand to a fixed-size array.
    pub fn expand_fixed<const N: usize>(&self, info: &[u8]) -> Result<[u8; N]> {
        let mut okm = [0u8; N];
        self.prk
            .expand(info, &mut okm)
            .map_err(|_| Error::crypto("HKDF expansion failed"))?;
        Ok(okm)
    }

    /// Derive an AEAD key.
    pub fn derive_aead_key(&self, info: &[u8]) -> Result<AeadKey> {
        let key_bytes = Zeroizing::new(self.expand_fixed::<KEY_SIZE>(info)?);
        Ok(AeadKey::from_bytes(*key_bytes))
    }
}

/// Passphrase salt. Not secret; stored next to whatever it protects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(#[serde(with = "hex_salt")] [u8; SALT_SIZE]);

impl Salt {
    /// Generate a fresh random salt.
    pub fn random() -> Self {
        Self(SecureRandom::bytes())
    }

    /// Create a salt from raw bytes.
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

mod hex_salt {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use crate::crypto::SALT_SIZE;

    pub fn serialize<S: Serializer>(
        bytes: &[u8; SALT_SIZE],
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<[u8; SALT_SIZE], D::Error> {
        let text = String::deserialize(d)?;
        let raw = hex::decode(&text).map_err(D::Error::custom)?;
        raw.as_slice()
            .try_into()
            .map_err(|_| D::Error::custom(format!("salt must be {} bytes", SALT_SIZE)))
    }
}

/// Derive a 256-bit key from a passphrase with PBKDF2-HMAC-SHA256.
///
/// `iterations` must lie within
/// [`MIN_PBKDF2_ITERATIONS`]..=[`MAX_PBKDF2_ITERATIONS`].
pub fn derive_passphrase_key(passphrase: &[u8], salt: &Salt, iterations: u32) -> Result<AeadKey> {
    if !(MIN_PBKDF2_ITERATIONS..=MAX_PBKDF2_ITERATIONS).contains(&iterations) {
        return Err(Error::config(format!(
            "PBKDF2 iterations {} outside {}..={}",
            iterations, MIN_PBKDF2_ITERATIONS, MAX_PBKDF2_ITERATIONS
        )));
    }
    if passphrase.is_empty() {
        return Err(Error::config("passphrase cannot be empty"));
    }

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(passphrase, salt.as_bytes(), iterations, &mut key[..])
        .map_err(|_| Error::crypto("PBKDF2 derivation failed"))?;
    Ok(AeadKey::from_bytes(*key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hkdf_expand_deterministic() {
        let hkdf = Hkdf::new(Some(&[0x00u8; 13]), &[0x0bu8; 22]);
        let a: [u8; 42] = hkdf.expand_fixed(&[0xf0u8; 10]).unwrap();
        let b: [u8; 42] = hkdf.expand_fixed(&[0xf0u8; 10]).unwrap();
        assert_eq!(a, b);

        let k1 = hkdf.derive_aead_key(b"one").unwrap();
        let k2 = hkdf.derive_aead_key(b"two").unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_pbkdf2_deterministic_and_sensitive() {
        let salt = Salt::from_bytes([7u8; SALT_SIZE]);
        let a = derive_passphrase_key(b"correct horse", &salt, MIN_PBKDF2_ITERATIONS).unwrap();
        let b = derive_passphrase_key(b"correct horse", &salt, MIN_PBKDF2_ITERATIONS).unwrap();
        assert_eq!(a, b);

        let other_salt = Salt::from_bytes([8u8; SALT_SIZE]);
        let c =
            derive_passphrase_key(b"correct horse", &other_salt, MIN_PBKDF2_ITERATIONS).unwrap();
        assert_ne!(a, c);

        let d = derive_passphrase_key(b"correct horsf", &salt, MIN_PBKDF2_ITERATIONS).unwrap();
        assert_ne!(a, d);
    }

    #[test]
    fn test_pbkdf2_rejects_weak_parameters() {
        let salt = Salt::random();
        assert!(derive_passphrase_key(b"pw", &salt, 1).is_err());
        assert!(derive_passphrase_key(b"", &salt, MIN_PBKDF2_ITERATIONS).is_err());
        assert!(derive_passphrase_key(b"pw", &salt, MAX_PBKDF2_ITERATIONS + 1).is_err());
    }

    #[test]
    fn test_salt_hex_serde() {
        let salt = Salt::from_bytes([0xab; SALT_SIZE]);
        let json = serde_json::to_string(&salt).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(SALT_SIZE)));

        let restored: Salt = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, salt);

        assert!(serde_json::from_str::<Salt>("\"abcd\"").is_err());
    }
}
