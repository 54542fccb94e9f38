//! # arbor-audit: Authorization and lifecycle audit log
//!
//! An append-only, bounded, in-memory record of every security-relevant
//! decision: authorization outcomes, capability lifecycle, identity
//! lifecycle, and channel membership transitions. Events belonging to one
//! user action share a [`TraceId`] so a denial can be correlated with the
//! internal detail that caused it.
//!
//! Appending never fails from the caller's point of view: by the time an
//! event is recorded, the underlying cryptographic or authorization side
//! effect has already happened, so a full buffer is logged via `tracing`
//! and the oldest events are dropped.

#![warn(missing_docs)]

pub mod event;
pub mod log;

pub use event::{AuditEvent, AuditKind, TraceId};
pub use log::AuditLog;
