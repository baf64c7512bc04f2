//! End-to-end link: the transmitter and receiver pipelines.
//!
//! ```text
//!  Transmitter                                   Receiver
//!  ───────────                                   ────────
//!  payload ─► encrypt(aad = header)              audio ─► acquire sync word
//!          ─► frame (len|prio|seq|ts|nonce|ct|tag)     ─► track carrier, de-spread
//!          ─► sync word + spread bits                   ─► read length, de-frame
//!          ─► BPSK modulate                             ─► decrypt (fails closed
//!          ─► mask into bed ──────── audio ─────►          once the key is wiped)
//! ```
//!
//! Both ends are built from the same [`LinkProfile`] and a [`CryptoEngine`]
//! holding the shared session key.
//!
//! [`CryptoEngine`]: crate::crypto::CryptoEngine

mod profile;
mod receiver;
mod stats;
mod transmitter;

pub use profile::{KeySchedule, LinkProfile, PROFILE_VERSION, SYNC_BITS};
pub use receiver::{DecodedMessage, Receiver, SignalQuality};
pub use stats::{LinkStats, StatsSnapshot};
pub use transmitter::{Encoded, Transmission, Transmitter};
