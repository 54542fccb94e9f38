//! Error types for arbor-crypto

/// Result type for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Cryptographic errors
///
/// `DecryptionFailed` deliberately carries no detail: tampered ciphertext,
/// tag, nonce, key, or AAD all surface identically.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD open failed (any cause)
    #[error("decryption failed")]
    DecryptionFailed,

    /// A key, nonce, or tag had the wrong length
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        actual: usize,
    },

    /// Byte sequence is not a valid public key
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Byte sequence is not a valid signature
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    /// HKDF expansion failed (output length out of range)
    #[error("key derivation failed: {0}")]
    DerivationFailed(String),
}
