//! Authorization outcomes

use arbor_caps::ConstraintViolation;
use serde::{Deserialize, Serialize};

/// Outcome of an authorization request.
///
/// Denials and pending approvals are normal negative outcomes, not
/// errors; callers branch on this enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// The request is authorized
    Authorized {
        /// Capability that authorized it
        capability_id: String,
        /// Reflex warnings that fired along the way
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },

    /// The request is denied
    Denied {
        /// Why
        reason: DenyReason,
    },

    /// The request awaits an approval decision
    PendingApproval {
        /// Handle into the approval service
        proposal_id: String,
    },
}

impl Decision {
    /// Whether this is an `Authorized` outcome.
    pub fn is_authorized(&self) -> bool {
        matches!(self, Decision::Authorized { .. })
    }
}

/// Reasons for a denial.
///
/// Cryptographic failures are deliberately indistinct: invalid
/// signatures, broken chains, and tampered records all surface as
/// `Unauthorized`. Constraint violations keep their kind so callers can
/// adapt (back off, re-request inside the window, narrow the path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    /// No capability covers the requested resource
    NoCapability,

    /// A capability exists but failed verification
    Unauthorized,

    /// A reflex hard-blocked the request
    ReflexBlocked {
        /// The reflex that fired
        reflex_id: String,
        /// Its operator-facing message
        message: String,
    },

    /// A constraint refused the request
    ConstraintViolated(ConstraintViolation),

    /// The requested path escapes the capability root
    PathTraversal {
        /// The offending path
        path: String,
    },

    /// The capability demands approval but escalation is not wired
    EscalationDisabled,

    /// The signed request failed verification
    IdentityVerificationFailed,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Authorized {
                capability_id,
                warnings,
            } if warnings.is_empty() => write!(f, "authorized via {capability_id}"),
            Decision::Authorized {
                capability_id,
                warnings,
            } => write!(
                f,
                "authorized via {capability_id} ({} warning(s))",
                warnings.len()
            ),
            Decision::Denied { reason } => write!(f, "denied: {reason}"),
            Decision::PendingApproval { proposal_id } => {
                write!(f, "pending approval ({proposal_id})")
            }
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::NoCapability => f.write_str("no_capability"),
            DenyReason::Unauthorized => f.write_str("unauthorized"),
            DenyReason::ReflexBlocked { reflex_id, message } => {
                write!(f, "blocked by reflex {reflex_id}: {message}")
            }
            DenyReason::ConstraintViolated(violation) => {
                write!(f, "constraint_violated: {}", violation.kind())
            }
            DenyReason::PathTraversal { path } => write!(f, "path_traversal: {path}"),
            DenyReason::EscalationDisabled => f.write_str("escalation_disabled"),
            DenyReason::IdentityVerificationFailed => {
                f.write_str("identity_verification_failed")
            }
        }
    }
}
