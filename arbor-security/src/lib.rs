//! # arbor-security: The authorization facade
//!
//! Ties the substrate together: identity verification, capability lookup,
//! signature and delegation-chain verification, constraint enforcement,
//! reflex pre-checks, and approval escalation, in one ordered pipeline
//! behind [`Arbor::authorize`].
//!
//! Denials and pending approvals are ordinary [`Decision`] values;
//! `Err` is reserved for programmer errors (malformed URIs, unknown
//! roles) and infrastructure failures. Cryptographic detail never leaks
//! to callers: tampered signatures, broken chains, and unresolvable
//! issuers all collapse to an unauthorized denial, with the specifics
//! recorded in the audit log under the request's trace id.

#![warn(missing_docs)]

pub mod approval;
pub mod config;
pub mod decision;
pub mod error;
pub mod facade;
pub mod reflex;
pub mod roles;

pub use approval::{ApprovalProposal, ApprovalService, AutoApprovalService};
pub use config::SecurityConfig;
pub use decision::{Decision, DenyReason};
pub use error::{Result, SecurityError};
pub use facade::{Arbor, AuthorizeOptions};
pub use reflex::{
    builtin_reflexes, Reflex, ReflexContext, ReflexEngine, ReflexKind, ReflexOutcome,
    ReflexResponse,
};
pub use roles::RoleAssignments;
