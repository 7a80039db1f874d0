//! Per-peer session key ratchet.
//!
//! `key_0 = PBKDF2(lower(sender ++ recipient), salt)` and
//! `key_n = PBKDF2(hex(key_{n-1}), salt)`, with 50000 rounds of
//! HMAC-SHA256 and a 16-byte output. Both the password and the salt are fed
//! to PBKDF2 as hex/address *strings*, which is what deployed peers do.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::kdf::{derive_key, PBKDF2_ITERATIONS};
use crate::ledger::Address;

/// A 16-byte AES session key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 16]);

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// What the next key is derived from.
#[derive(Debug, Clone, Copy)]
pub enum RatchetSeed<'a> {
    /// No key yet: both parties know the two addresses.
    Bootstrap { sender: &'a Address, recipient: &'a Address },
    /// Advance from the previous key.
    Prior(&'a SessionKey),
}

impl<'a> RatchetSeed<'a> {
    /// `Prior(key)` if there is one, else the bootstrap seed for the
    /// `sender -> recipient` direction.
    pub fn for_direction(prior: Option<&'a SessionKey>, sender: &'a Address, recipient: &'a Address) -> Self {
        match prior {
            Some(key) => RatchetSeed::Prior(key),
            None => RatchetSeed::Bootstrap { sender, recipient },
        }
    }

    fn password(&self) -> zeroize::Zeroizing<String> {
        zeroize::Zeroizing::new(match self {
            RatchetSeed::Bootstrap { sender, recipient } => format!("{sender}{recipient}").to_lowercase(),
            RatchetSeed::Prior(key) => hex::encode(key.as_bytes()),
        })
    }
}

/// Derives the next session key from `seed` and `salt`.
pub fn derive_session_key(seed: RatchetSeed<'_>, salt: &[u8]) -> SessionKey {
    let password = seed.password();
    let salt_hex = hex::encode(salt);
    SessionKey(derive_key(password.as_bytes(), salt_hex.as_bytes(), PBKDF2_ITERATIONS))
}
