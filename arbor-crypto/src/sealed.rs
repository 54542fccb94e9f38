//! Sealed envelopes
//!
//! Authenticated encryption to a recipient's X25519 public key: an
//! ephemeral sender keypair performs ECDH with the recipient key, the
//! shared secret is expanded with HKDF under a fixed info string, and the
//! payload is sealed with AES-256-GCM. Only the holder of the recipient
//! secret can open it; the ephemeral secret is dropped after sealing.

use crate::aead::{aead_decrypt, aead_encrypt};
use crate::error::Result;
use crate::kdf::hkdf_derive_key;
use crate::keys::{ecdh, EncryptionKeyPair, EncryptionPublicKey, EncryptionSecretKey};
use crate::{NONCE_LEN, PUBLIC_KEY_LEN, TAG_LEN};
use serde::{Deserialize, Serialize};

/// Domain-separation info string for sealed-envelope key derivation.
const SEALED_ENVELOPE_INFO: &[u8] = b"arbor-sealed-envelope-v1";

/// An envelope sealed to a single recipient public key.
///
/// Wire form: `{ciphertext, iv, tag, sender_public}`. The sender public key
/// is the ephemeral half the recipient needs for ECDH; it is authenticated
/// as AAD, so swapping it breaks the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Encrypted payload
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,

    /// AEAD nonce
    #[serde(with = "hex::serde")]
    pub iv: [u8; NONCE_LEN],

    /// AEAD authentication tag
    #[serde(with = "hex::serde")]
    pub tag: [u8; TAG_LEN],

    /// Ephemeral sender public key
    #[serde(with = "hex::serde")]
    pub sender_public: [u8; PUBLIC_KEY_LEN],
}

impl SealedEnvelope {
    /// Seal `plaintext` to `recipient`.
    pub fn seal(plaintext: &[u8], recipient: &EncryptionPublicKey) -> Self {
        let ephemeral = EncryptionKeyPair::generate();
        let shared = ecdh(&ephemeral.secret, recipient);
        let key = hkdf_derive_key(&shared, &[], SEALED_ENVELOPE_INFO);

        let sender_public = ephemeral.public_bytes();
        let sealed = aead_encrypt(plaintext, &key, &sender_public);

        Self {
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            tag: sealed.tag,
            sender_public,
        }
    }

    /// Open the envelope with the recipient's secret key.
    pub fn unseal(&self, recipient_secret: &EncryptionSecretKey) -> Result<Vec<u8>> {
        let sender = EncryptionPublicKey::from(self.sender_public);
        let shared = ecdh(recipient_secret, &sender);
        let key = hkdf_derive_key(&shared, &[], SEALED_ENVELOPE_INFO);

        let sealed = crate::aead::AeadCiphertext {
            ciphertext: self.ciphertext.clone(),
            iv: self.iv,
            tag: self.tag,
        };
        aead_decrypt(&sealed, &key, &self.sender_public)
    }
}
