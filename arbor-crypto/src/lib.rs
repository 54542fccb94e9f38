//! # arbor-crypto: Cryptographic primitives for Arbor
//!
//! Thin, opinionated wrappers over the primitives the trust substrate is
//! built on:
//!
//! - **Ed25519** signing and verification (capability and request signatures)
//! - **X25519** Diffie-Hellman (sealed envelopes, ratchet sessions)
//! - **HKDF-SHA256** key derivation
//! - **AES-256-GCM** authenticated encryption
//! - **SHA-256** hashing and agent-id derivation
//!
//! All keys and nonces are fixed-length byte sequences; a wrong-sized input
//! is a programmer error surfaced at the boundary as
//! [`CryptoError::InvalidKeyLength`]. Decryption failures are always
//! collapsed into the single [`CryptoError::DecryptionFailed`] variant so
//! callers cannot distinguish which part of the envelope was tampered with.

#![warn(missing_docs)]

pub mod aead;
pub mod at_rest;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod sealed;

// Re-exports for convenience
pub use aead::{aead_decrypt, aead_encrypt, AeadCiphertext};
pub use at_rest::EncryptedKey;
pub use error::{CryptoError, Result};
pub use kdf::{hkdf_derive, sha256};
pub use keys::{
    derive_agent_id, ecdh, sign, verify, EncryptionKeyPair, EncryptionPublicKey,
    EncryptionSecretKey, SigningKeyPair,
};
pub use sealed::SealedEnvelope;

/// Length of symmetric keys (AES-256, ratchet chains, channel keys).
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// Length of AEAD nonces (96-bit GCM IV).
pub const NONCE_LEN: usize = 12;

/// Length of AEAD authentication tags.
pub const TAG_LEN: usize = 16;

/// Length of Ed25519 signatures.
pub const SIGNATURE_LEN: usize = 64;

/// Length of X25519 and Ed25519 public keys.
pub const PUBLIC_KEY_LEN: usize = 32;
