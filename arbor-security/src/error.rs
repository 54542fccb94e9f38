//! Error types for arbor-security

/// Result type for facade operations
pub type Result<T> = std::result::Result<T, SecurityError>;

/// Facade-level errors.
///
/// Authorization denials are NOT errors; they are [`crate::Decision`]
/// values. These variants cover programmer errors and infrastructure
/// failures only.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// Role tag resolves to no capability bundle
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// Approval service failed to accept a proposal
    #[error("approval submission failed: {0}")]
    ApprovalSubmission(String),

    /// Capability layer failure (malformed URI, quota, storage)
    #[error(transparent)]
    Caps(#[from] arbor_caps::CapsError),

    /// Identity layer failure
    #[error(transparent)]
    Identity(#[from] arbor_identity::IdentityError),
}
