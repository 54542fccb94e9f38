//! Error types for arbor-identity

use crate::identity::AgentId;

/// Result type for identity operations
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Identity registry and verification errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// No entry for this agent id
    #[error("identity not found: {0}")]
    NotFound(AgentId),

    /// Registration collided with a live (non-revoked) entry
    #[error("identity already registered: {0}")]
    AlreadyRegistered(AgentId),

    /// Lookup hit a suspended identity
    #[error("identity suspended: {0}")]
    IdentitySuspended(AgentId),

    /// Lookup hit a revoked identity
    #[error("identity revoked: {0}")]
    IdentityRevoked(AgentId),

    /// Suspend called on a revoked identity
    #[error("cannot suspend revoked identity: {0}")]
    CannotSuspendRevoked(AgentId),

    /// Resume called on a revoked identity
    #[error("cannot resume revoked identity: {0}")]
    CannotResumeRevoked(AgentId),

    /// Resume called on an identity that is not suspended
    #[error("identity not suspended: {0}")]
    NotSuspended(AgentId),

    /// A string did not parse as an agent id
    #[error("invalid agent id: {0}")]
    InvalidAgentId(String),

    /// Signed request signature did not verify
    #[error("invalid signature for agent {0}")]
    InvalidSignature(AgentId),

    /// Signed request fell outside the replay window
    #[error("signed request outside replay window (signed_at {signed_at}, window {window_seconds}s)")]
    StaleSignature {
        /// When the request claims to have been signed
        signed_at: chrono::DateTime<chrono::Utc>,
        /// The configured replay window
        window_seconds: i64,
    },

    /// Signed request reused a nonce inside the replay window
    #[error("nonce replayed for agent {0}")]
    NonceReplayed(AgentId),

    /// Keystore has no entry under this name
    #[error("no stored key for {0}")]
    NoStoredKey(String),

    /// Underlying cryptographic failure
    #[error(transparent)]
    Crypto(#[from] arbor_crypto::CryptoError),
}
