//! Error types for arbor-caps

use arbor_identity::AgentId;

/// Result type for capability operations
pub type Result<T> = std::result::Result<T, CapsError>;

/// Quota kinds reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    /// Per-principal capability count
    PerAgentCapabilityLimit,
    /// Total active capability count
    GlobalCapabilityLimit,
    /// Maximum delegation depth value
    DelegationDepthLimit,
    /// Delegation depth below zero
    NegativeDepth,
}

/// Capability store, signer, and constraint errors
#[derive(Debug, thiserror::Error)]
pub enum CapsError {
    /// No capability under this id
    #[error("capability not found: {0}")]
    NotFound(String),

    /// Capability exists but its expiry has passed
    #[error("capability expired: {0}")]
    CapabilityExpired(String),

    /// A store quota rejected the write
    #[error("quota exceeded ({kind:?}): {context}")]
    QuotaExceeded {
        /// Which quota fired
        kind: QuotaKind,
        /// Limit and observed value
        context: String,
    },

    /// Issuer signature over the canonical encoding did not verify
    #[error("invalid capability signature on {0}")]
    InvalidCapabilitySignature(String),

    /// A delegation record failed structural or signature verification
    #[error("broken delegation chain: {0}")]
    BrokenDelegationChain(String),

    /// Delegation attempted on a capability with depth 0
    #[error("delegation depth exhausted for {0}")]
    DelegationDepthExhausted(String),

    /// Delegator's private key does not match the parent principal
    #[error("delegator key does not match principal {0}")]
    DelegatorKeyMismatch(AgentId),

    /// Child constraints would widen the parent's
    #[error("constraints do not narrow: {0}")]
    ConstraintsNotNarrowed(String),

    /// String did not parse as a resource URI
    #[error("malformed resource uri: {0}")]
    MalformedUri(String),

    /// Requested path escapes the capability root
    #[error("path traversal: {0}")]
    PathTraversal(String),

    /// Path resolution applied to a non-filesystem resource
    #[error("not a filesystem resource: {0}")]
    NotFsResource(String),

    /// Identity registry failure (lookup, gating)
    #[error(transparent)]
    Identity(#[from] arbor_identity::IdentityError),

    /// Underlying cryptographic failure
    #[error(transparent)]
    Crypto(#[from] arbor_crypto::CryptoError),
}
