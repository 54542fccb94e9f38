//! Encrypted key material at rest
//!
//! Identity private keys are stored wrapped in AES-256-GCM under a key
//! deterministically derived from an unlock secret and a context string
//! (HKDF). The context binds the wrapped blob to its owner so a blob
//! copied between entries fails to open.

use crate::aead::{aead_decrypt, aead_encrypt, AeadCiphertext};
use crate::error::Result;
use crate::kdf::hkdf_derive_key;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Domain-separation info string for at-rest key wrapping.
const AT_REST_INFO: &[u8] = b"arbor-key-at-rest-v1";

/// A private key encrypted for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKey {
    sealed: AeadCiphertext,
}

impl EncryptedKey {
    /// Wrap `key_material` under `unlock_secret`, bound to `context`.
    pub fn seal(key_material: &[u8], unlock_secret: &[u8], context: &str) -> Self {
        let wrap_key = derive_wrap_key(unlock_secret, context);
        Self {
            sealed: aead_encrypt(key_material, &wrap_key, context.as_bytes()),
        }
    }

    /// Unwrap with the same secret and context used to seal.
    ///
    /// The plaintext is returned in a [`Zeroizing`] buffer so it is wiped
    /// when dropped.
    pub fn open(&self, unlock_secret: &[u8], context: &str) -> Result<Zeroizing<Vec<u8>>> {
        let wrap_key = derive_wrap_key(unlock_secret, context);
        aead_decrypt(&self.sealed, &wrap_key, context.as_bytes()).map(Zeroizing::new)
    }
}

fn derive_wrap_key(unlock_secret: &[u8], context: &str) -> [u8; 32] {
    hkdf_derive_key(unlock_secret, context.as_bytes(), AT_REST_INFO)
}
