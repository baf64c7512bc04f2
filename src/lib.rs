//! # milcodec
//!
//! A covert command link that hides encrypted messages inside ordinary audio
//! using direct-sequence spread spectrum (DSSS) below the noise floor.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            Link (Transmitter / Receiver, stats)          │
//! ├─────────────────────────────────────────────────────────┤
//! │  Protocol Zero (two-step, fail-closed key destruction)   │
//! ├─────────────────────────────────────────────────────────┤
//! │  Crypto Layer (ChaCha20-Poly1305, PBKDF2, HKDF, X25519)  │
//! ├─────────────────────────────────────────────────────────┤
//! │  Framing (len | prio | seq | ts | nonce | ct | tag)      │
//! ├─────────────────────────────────────────────────────────┤
//! │  DSSS (m-sequence spreading, BPSK, sync acquisition)     │
//! ├─────────────────────────────────────────────────────────┤
//! │  Masking (power-domain mixing under a noise bed)         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Goals
//!
//! 1. **Concealment**: signal sits 10 to 30 dB below the carrier audio
//! 2. **Integrity**: every header field and payload byte is authenticated
//! 3. **Fail closed**: after a wipe nothing decodes, ever
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use milcodec::crypto::{AeadKey, CryptoEngine};
//! use milcodec::{LinkProfile, Priority, Receiver, Transmitter};
//!
//! # fn main() -> milcodec::Result<()> {
//! let key = [7u8; 32];
//! let engine = || Arc::new(CryptoEngine::new(AeadKey::from_bytes(key)));
//! let tx = Transmitter::new(LinkProfile::reference(), engine())?;
//! let rx = Receiver::new(LinkProfile::reference(), engine())?;
//!
//! let transmission = tx.transmit_over_noise(Priority::Flash, b"HOLD POSITION")?;
//! let message = rx.receive(&transmission.samples)?;
//! assert_eq!(message.payload, b"HOLD POSITION");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod crypto;
pub mod dsss;
pub mod error;
pub mod framing;
pub mod link;
pub mod masking;
pub mod protocol_zero;

pub use crypto::CryptoEngine;
pub use dsss::{CarrierParameters, SpreadingCode};
pub use error::{Error, FrameError, Result};
pub use framing::{Priority, MAX_PAYLOAD_LEN};
pub use link::{DecodedMessage, LinkProfile, Receiver, Transmitter};
pub use masking::MaskingConfig;
pub use protocol_zero::{ProtocolZero, WipeState};

/// Protocol version identifier
pub const PROTOCOL_VERSION: u8 = 0x01;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_profile_is_valid() {
        let profile = LinkProfile::default();
        assert!(profile.validate().is_ok());
        assert_eq!(profile.carrier, CarrierParameters::default());
        assert_eq!(profile.spreading_code().unwrap(), SpreadingCode::reference());
    }
}
