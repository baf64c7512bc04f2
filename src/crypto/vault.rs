//! Guarded key storage with fail-closed wipe.
//!
//! The vault is the single owner of session key material. Crypto calls run
//! under a read guard; [`KeyVault::wipe`] takes the write guard, so no
//! encrypt or decrypt can ever observe a half-wiped key. Once wiped, the
//! vault stays wiped.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::crypto::{Aead, AeadKey};
use crate::error::{Error, Result};

/// Operational status of the key vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Key is loaded and usable
    Operational,
    /// Key was destroyed; terminal
    Wiped,
}

enum KeySlot {
    Loaded(AeadKey),
    Wiped,
}

/// Exclusive owner of the session key.
pub struct KeyVault {
    slot: RwLock<KeySlot>,
}

impl KeyVault {
    /// Take ownership of a session key.
    pub fn new(key: AeadKey) -> Self {
        Self {
            slot: RwLock::new(KeySlot::Loaded(key)),
        }
    }

    /// Run `f` with a cipher built from the key.
    ///
    /// The read guard is held for the duration of `f`.
    ///
    /// # Errors
    ///
    /// [`Error::KeyWiped`] without calling `f` if the vault was wiped.
    pub fn with_cipher<T>(&self, f: impl FnOnce(&Aead) -> Result<T>) -> Result<T> {
        let slot = self.slot.read();
        match &*slot {
            KeySlot::Loaded(key) => f(&Aead::new(key)),
            KeySlot::Wiped => Err(Error::KeyWiped),
        }
    }

    /// Zero the key and switch to the terminal wiped state.
    ///
    /// Blocks until in-flight crypto calls release their read guards.
    /// Returns `false` if the vault was already wiped.
    pub fn wipe(&self) -> bool {
        let mut slot = self.slot.write();
        match &mut *slot {
            KeySlot::Loaded(key) => {
                // Zero in place so no copy of the key outlives the slot
                key.zeroize();
                *slot = KeySlot::Wiped;
                true
            }
            KeySlot::Wiped => false,
        }
    }

    /// Current status.
    pub fn status(&self) -> KeyStatus {
        match &*self.slot.read() {
            KeySlot::Loaded(_) => KeyStatus::Operational,
            KeySlot::Wiped => KeyStatus::Wiped,
        }
    }

    /// Check whether the key has been destroyed.
    pub fn is_wiped(&self) -> bool {
        self.status() == KeyStatus::Wiped
    }

    /// First 8 bytes of SHA-256 over the key, for operator display and logs.
    pub fn fingerprint(&self) -> Result<[u8; 8]> {
        let slot = self.slot.read();
        match &*slot {
            KeySlot::Loaded(key) => {
                let digest = Sha256::digest(key.as_bytes());
                let mut fp = [0u8; 8];
                fp.copy_from_slice(&digest[..8]);
                Ok(fp)
            }
            KeySlot::Wiped => Err(Error::KeyWiped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_wipe_is_terminal() {
        let vault = KeyVault::new(AeadKey::from_bytes([3u8; 32]));
        assert_eq!(vault.status(), KeyStatus::Operational);
        assert!(vault.with_cipher(|_| Ok(())).is_ok());

        assert!(vault.wipe());
        assert_eq!(vault.status(), KeyStatus::Wiped);
        assert!(!vault.wipe());

        let mut called = false;
        let result = vault.with_cipher(|_| {
            called = true;
            Ok(())
        });
        assert!(matches!(result, Err(Error::KeyWiped)));
        assert!(!called);
        assert!(matches!(vault.fingerprint(), Err(Error::KeyWiped)));
    }

    #[test]
    fn test_fingerprint_stable() {
        let a = KeyVault::new(AeadKey::from_bytes([3u8; 32]));
        let b = KeyVault::new(AeadKey::from_bytes([3u8; 32]));
        let c = KeyVault::new(AeadKey::from_bytes([4u8; 32]));
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn test_concurrent_use_and_wipe() {
        let vault = Arc::new(KeyVault::new(AeadKey::from_bytes([1u8; 32])));

        std::thread::scope(|s| {
            for _ in 0..4 {
                let vault = Arc::clone(&vault);
                s.spawn(move || {
                    for _ in 0..200 {
                        match vault.with_cipher(|_| Ok(())) {
                            Ok(()) | Err(Error::KeyWiped) => {}
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                    }
                });
            }
            s.spawn(|| {
                vault.wipe();
            });
        });

        assert!(vault.is_wiped());
    }
}
