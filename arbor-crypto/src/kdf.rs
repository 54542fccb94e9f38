//! Hashing and key derivation
//!
//! HKDF-SHA256 with explicit info strings keeps every derived key domain
//! separated; callers pass a distinct `info` per purpose.

use crate::error::{CryptoError, Result};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Derive `out.len()` bytes from input key material via HKDF-SHA256.
///
/// `salt` may be empty; `info` must be unique per derivation purpose.
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<()> {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, out)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))
}

/// Derive a fixed 32-byte key via HKDF-SHA256.
pub fn hkdf_derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    // 32 bytes is always within the HKDF output bound.
    hkdf_derive(ikm, salt, info, &mut out).expect("32-byte HKDF output is in range");
    out
}
