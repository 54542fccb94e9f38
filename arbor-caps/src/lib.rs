//! # arbor-caps: Capability tokens and their machinery
//!
//! A capability is an unforgeable token binding a principal to an action
//! on a resource, carrying optional constraints and a cryptographically
//! verifiable delegation lineage. This crate owns:
//!
//! - the token data model and its deterministic signing encoding
//! - the [`CapabilityStore`]: keyed storage with principal/parent
//!   indices, quota enforcement, lazy expiry, and cascade revocation
//! - the [`CapabilitySigner`]: system-authority signatures, delegation,
//!   and delegation-chain verification
//! - the [`ConstraintEnforcer`] and its token-bucket [`RateLimiter`]
//! - traversal-safe path resolution under a capability's root
//!
//! The authorization pipeline itself lives one layer up in
//! `arbor-security`; everything here is mechanism, not policy.

#![warn(missing_docs)]

pub mod capability;
pub mod enforcer;
pub mod error;
pub mod paths;
pub mod ratelimit;
pub mod signer;
pub mod store;
pub mod uri;

pub use capability::{Capability, Constraints, DelegationRecord, TimeWindow};
pub use enforcer::{ConstraintEnforcer, ConstraintViolation, Enforcement};
pub use error::{CapsError, QuotaKind, Result};
pub use paths::resolve_relative;
pub use ratelimit::{RateDecision, RateLimiter, RateLimiterConfig};
pub use signer::CapabilitySigner;
pub use store::{CapabilityStore, StoreQuotas, StoreStats};
pub use uri::ResourceUri;
