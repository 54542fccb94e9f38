//! AES-256-GCM authenticated encryption
//!
//! Ciphertext, IV, and tag travel as separate fields so envelope formats
//! can name them explicitly. The tag authenticates ciphertext and AAD;
//! any mismatch collapses into [`CryptoError::DecryptionFailed`].

use crate::error::{CryptoError, Result};
use crate::{NONCE_LEN, SYMMETRIC_KEY_LEN, TAG_LEN};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Output of [`aead_encrypt`]: ciphertext plus the IV and tag needed to open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AeadCiphertext {
    /// Encrypted payload (without the trailing tag)
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,

    /// Random 96-bit GCM nonce
    #[serde(with = "hex::serde")]
    pub iv: [u8; NONCE_LEN],

    /// 128-bit authentication tag
    #[serde(with = "hex::serde")]
    pub tag: [u8; TAG_LEN],
}

/// Encrypt with AES-256-GCM under a fresh random IV.
pub fn aead_encrypt(
    plaintext: &[u8],
    key: &[u8; SYMMETRIC_KEY_LEN],
    aad: &[u8],
) -> AeadCiphertext {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut iv = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut combined = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .expect("AES-GCM encryption is infallible for in-memory buffers");

    // aes-gcm appends the tag to the ciphertext; split it back out.
    let tag_start = combined.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&combined[tag_start..]);
    combined.truncate(tag_start);

    AeadCiphertext {
        ciphertext: combined,
        iv,
        tag,
    }
}

/// Decrypt an [`AeadCiphertext`].
///
/// Fails with the single [`CryptoError::DecryptionFailed`] variant for any
/// tamper: ciphertext, tag, IV, key, or AAD.
pub fn aead_decrypt(
    sealed: &AeadCiphertext,
    key: &[u8; SYMMETRIC_KEY_LEN],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut combined = Vec::with_capacity(sealed.ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(&sealed.ciphertext);
    combined.extend_from_slice(&sealed.tag);

    cipher
        .decrypt(
            Nonce::from_slice(&sealed.iv),
            Payload {
                msg: &combined,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}
