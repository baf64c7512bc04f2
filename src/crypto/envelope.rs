//! Self-contained passphrase envelopes.
//!
//! For payloads stored or handed around outside a live link session, the
//! salt and iteration count travel with the ciphertext so the holder of the
//! passphrase can re-derive the key.
//!
//! Wire format:
//! ```text
//! ┌────────────┬─────────┬────────────────┬──────────┬───────────┬────────────┬──────────┐
//! │ Magic (4)  │ Ver (1) │ Iterations (4) │ Salt(16) │ Nonce(12) │ Ciphertext │ Tag (16) │
//! └────────────┴─────────┴────────────────┴──────────┴───────────┴────────────┴──────────┘
//! ```
//! The header (magic through nonce) is authenticated as associated data.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::{Buf, BufMut, BytesMut};

use crate::crypto::{
    derive_passphrase_key, Aead, Nonce, Salt, SecureRandom, Tag, MAX_PBKDF2_ITERATIONS,
    MIN_PBKDF2_ITERATIONS, NONCE_SIZE, SALT_SIZE, TAG_SIZE,
};
use crate::error::{Error, Result};

/// Envelope magic bytes.
pub const ENVELOPE_MAGIC: [u8; 4] = *b"MCEV";

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 2;

const HEADER_SIZE: usize = 4 + 1 + 4 + SALT_SIZE + NONCE_SIZE;

/// A parsed passphrase envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// PBKDF2 iterations used to derive the key
    pub iterations: u32,
    /// Salt used to derive the key
    pub salt: Salt,
    /// AEAD nonce
    pub nonce: Nonce,
    /// Encrypted payload
    pub ciphertext: Vec<u8>,
    /// Authentication tag
    pub tag: Tag,
}

impl Envelope {
    fn header(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_slice(&ENVELOPE_MAGIC);
        buf.put_u8(ENVELOPE_VERSION);
        buf.put_u32(self.iterations);
        buf.put_slice(self.salt.as_bytes());
        buf.put_slice(self.nonce.as_bytes());
        buf
    }

    /// Serialize to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.header();
        buf.reserve(self.ciphertext.len() + TAG_SIZE);
        buf.put_slice(&self.ciphertext);
        buf.put_slice(self.tag.as_bytes());
        buf.to_vec()
    }

    /// Parse from bytes. Structure only; nothing is authenticated yet.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE + TAG_SIZE {
            return Err(Error::Buffer {
                expected: HEADER_SIZE + TAG_SIZE,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != ENVELOPE_MAGIC {
            return Err(Error::InvalidMessage("not a milcodec envelope".into()));
        }
        let version = buf.get_u8();
        if version != ENVELOPE_VERSION {
            return Err(Error::InvalidMessage(format!("unsupported envelope version {}", version)));
        }
        let iterations = buf.get_u32();
        if !(MIN_PBKDF2_ITERATIONS..=MAX_PBKDF2_ITERATIONS).contains(&iterations) {
            return Err(Error::InvalidMessage(format!(
                "implausible iteration count {}",
                iterations
            )));
        }

        let mut salt = [0u8; SALT_SIZE];
        buf.copy_to_slice(&mut salt);
        let mut nonce = [0u8; NONCE_SIZE];
        buf.copy_to_slice(&mut nonce);

        let body_len = buf.remaining() - TAG_SIZE;
        let ciphertext = buf[..body_len].to_vec();
        buf.advance(body_len);
        let mut tag = [0u8; TAG_SIZE];
        buf.copy_to_slice(&mut tag);

        Ok(Self {
            iterations,
            salt: Salt::from_bytes(salt),
            nonce: Nonce::from_bytes(nonce),
            ciphertext,
            tag: Tag::from_bytes(tag),
        })
    }

    /// Base64 text armor.
    pub fn to_armored(&self) -> String {
        BASE64.encode(self.encode())
    }

    /// Parse base64 text armor.
    pub fn from_armored(text: &str) -> Result<Self> {
        let raw = BASE64
            .decode(text.trim())
            .map_err(|e| Error::InvalidMessage(format!("invalid base64: {}", e)))?;
        Self::decode(&raw)
    }
}

/// Encrypt `plaintext` under a key derived from `passphrase` with a fresh salt.
pub fn seal_with_passphrase(
    plaintext: &[u8],
    passphrase: &[u8],
    iterations: u32,
) -> Result<Envelope> {
    let salt = Salt::random();
    let key = derive_passphrase_key(passphrase, &salt, iterations)?;
    // Fresh key per envelope, so a random nonce cannot collide under it
    let nonce = Nonce::from_bytes(SecureRandom::bytes());

    let mut envelope = Envelope {
        iterations,
        salt,
        nonce,
        ciphertext: Vec::new(),
        tag: Tag::from_bytes([0u8; TAG_SIZE]),
    };
    let (ciphertext, tag) = Aead::new(&key).seal_detached(&nonce, plaintext, &envelope.header())?;
    envelope.ciphertext = ciphertext;
    envelope.tag = tag;
    Ok(envelope)
}

/// Re-derive the key and decrypt.
///
/// # Errors
///
/// [`Error::Authentication`] for a wrong passphrase or any tampering.
pub fn open_with_passphrase(envelope: &Envelope, passphrase: &[u8]) -> Result<Vec<u8>> {
    let key = derive_passphrase_key(passphrase, &envelope.salt, envelope.iterations)?;
    Aead::new(&key).open_detached(
        &envelope.nonce,
        &envelope.ciphertext,
        &envelope.tag,
        &envelope.header(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITER: u32 = MIN_PBKDF2_ITERATIONS;

    #[test]
    fn test_envelope_roundtrip_through_bytes() {
        let order = b"CMD:ALL:FLASH:STAND DOWN";
        let envelope = seal_with_passphrase(order, b"pass phrase", ITER).unwrap();
        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(open_with_passphrase(&decoded, b"pass phrase").unwrap(), order);
    }

    #[test]
    fn test_envelope_armor() {
        let envelope = seal_with_passphrase(b"hello", b"pw-12345", ITER).unwrap();
        let text = envelope.to_armored();
        let restored = Envelope::from_armored(&format!("  {}\n", text)).unwrap();
        assert_eq!(open_with_passphrase(&restored, b"pw-12345").unwrap(), b"hello");
        assert!(Envelope::from_armored("!!not base64!!").is_err());
    }

    #[test]
    fn test_wrong_passphrase_is_auth_failure() {
        let envelope = seal_with_passphrase(b"hello", b"right", ITER).unwrap();
        assert!(matches!(open_with_passphrase(&envelope, b"wrong"), Err(Error::Authentication)));
    }

    #[test]
    fn test_header_is_authenticated() {
        let envelope = seal_with_passphrase(b"hello", b"right", ITER).unwrap();
        let mut raw = envelope.encode();
        // Flip a bit inside the nonce field
        raw[HEADER_SIZE - 1] ^= 0x01;
        let tampered = Envelope::decode(&raw).unwrap();
        assert!(matches!(open_with_passphrase(&tampered, b"right"), Err(Error::Authentication)));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(Envelope::decode(&[0u8; 10]), Err(Error::Buffer { .. })));

        let mut raw = seal_with_passphrase(b"x", b"pw", ITER).unwrap().encode();
        raw[0] = b'X';
        assert!(matches!(Envelope::decode(&raw), Err(Error::InvalidMessage(_))));

        let mut raw = seal_with_passphrase(b"x", b"pw", ITER).unwrap().encode();
        raw[4] = 9;
        assert!(matches!(Envelope::decode(&raw), Err(Error::InvalidMessage(_))));

        let mut raw = seal_with_passphrase(b"x", b"pw", ITER).unwrap().encode();
        raw[5..9].copy_from_slice(&1u32.to_be_bytes());
        assert!(matches!(Envelope::decode(&raw), Err(Error::InvalidMessage(_))));
    }
}
