//! Protocol Zero: confirmed, irreversible key destruction.
//!
//! ```text
//!            request_wipe()            confirm(code)
//!   ARMED ──────────────────► CONFIRM_PENDING ──────────► WIPED (terminal)
//!     ▲                             │
//!     └── cancel() / wrong code / ──┘
//!         window expired
//! ```
//!
//! The controller shares the [`KeyVault`] with the crypto engine. Entering
//! `WIPED` zeroes the key under the vault's write lock, so every later
//! encrypt or decrypt fails with [`Error::KeyWiped`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::crypto::{KeyVault, SecureRandom};
use crate::error::{Error, Result};

/// How long a wipe challenge stays valid by default.
pub const DEFAULT_CONFIRM_WINDOW: Duration = Duration::from_secs(30);

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeState {
    /// Key is live; no wipe requested
    Armed,
    /// A wipe was requested and awaits its confirmation code
    ConfirmPending,
    /// Key destroyed
    Wiped,
}

impl fmt::Display for WipeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WipeState::Armed => "ARMED",
            WipeState::ConfirmPending => "CONFIRM_PENDING",
            WipeState::Wiped => "WIPED",
        })
    }
}

/// Challenge returned by [`ProtocolZero::request_wipe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeChallenge {
    /// Code the operator must echo back to confirm
    pub code: String,
    /// Time left to confirm
    pub expires_in: Duration,
}

struct Pending {
    code: String,
    issued_at: Instant,
}

struct Inner {
    state: WipeState,
    pending: Option<Pending>,
}

/// The key-wipe controller.
pub struct ProtocolZero {
    vault: Arc<KeyVault>,
    inner: Mutex<Inner>,
    confirm_window: Duration,
}

fn codes_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl ProtocolZero {
    /// Arm a controller over `vault`.
    pub fn new(vault: Arc<KeyVault>) -> Self {
        Self::with_confirm_window(vault, DEFAULT_CONFIRM_WINDOW)
    }

    /// Arm a controller with a custom confirmation window.
    pub fn with_confirm_window(vault: Arc<KeyVault>, confirm_window: Duration) -> Self {
        let state = if vault.is_wiped() {
            WipeState::Wiped
        } else {
            WipeState::Armed
        };
        Self {
            vault,
            inner: Mutex::new(Inner { state, pending: None }),
            confirm_window,
        }
    }

    /// The guarded vault.
    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    /// Current state.
    pub fn state(&self) -> WipeState {
        let mut inner = self.inner.lock();
        // Another holder of the vault may have wiped it directly
        if self.vault.is_wiped() {
            inner.state = WipeState::Wiped;
            inner.pending = None;
        }
        inner.state
    }

    /// Step one: request a wipe and receive the confirmation code.
    ///
    /// Requesting again while pending issues a fresh code and restarts
    /// the window.
    pub fn request_wipe(&self) -> Result<WipeChallenge> {
        if self.state() == WipeState::Wiped {
            return Err(Error::KeyWiped);
        }

        let code = hex::encode_upper(SecureRandom::bytes::<4>());
        let mut inner = self.inner.lock();
        inner.state = WipeState::ConfirmPending;
        inner.pending = Some(Pending {
            code: code.clone(),
            issued_at: Instant::now(),
        });
        tracing::warn!("protocol zero: wipe requested, awaiting confirmation");

        Ok(WipeChallenge {
            code,
            expires_in: self.confirm_window,
        })
    }

    /// Abort a pending wipe. Returns `false` if none was pending.
    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != WipeState::ConfirmPending {
            return false;
        }
        inner.state = WipeState::Armed;
        inner.pending = None;
        tracing::info!("protocol zero: wipe cancelled");
        true
    }

    /// Step two: confirm with the issued code and destroy the key.
    ///
    /// A wrong or expired code returns to `ARMED`; a new request is needed.
    ///
    /// # Errors
    ///
    /// [`Error::WipeConfirmation`] if nothing is pending or the code is
    /// wrong or expired; [`Error::KeyWiped`] if already wiped.
    pub fn confirm(&self, code: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if self.vault.is_wiped() {
            inner.state = WipeState::Wiped;
            inner.pending = None;
        }

        match inner.state {
            WipeState::Wiped => return Err(Error::KeyWiped),
            WipeState::Armed => return Err(Error::WipeConfirmation("no wipe requested".into())),
            WipeState::ConfirmPending => {}
        }

        let Some(pending) = inner.pending.take() else {
            inner.state = WipeState::Armed;
            return Err(Error::WipeConfirmation("no wipe requested".into()));
        };

        if pending.issued_at.elapsed() >= self.confirm_window {
            inner.state = WipeState::Armed;
            tracing::info!("protocol zero: confirmation window expired");
            return Err(Error::WipeConfirmation("confirmation window expired".into()));
        }
        if !codes_match(code.trim(), &pending.code) {
            inner.state = WipeState::Armed;
            tracing::warn!("protocol zero: wrong confirmation code, disarming request");
            return Err(Error::WipeConfirmation("confirmation code mismatch".into()));
        }

        self.vault.wipe();
        inner.state = WipeState::Wiped;
        tracing::warn!("protocol zero: key material wiped");
        Ok(())
    }
}
