//! # arbor-identity: Key-derived identities and their lifecycle
//!
//! An identity is a pair of public keys (Ed25519 for signing, X25519 for
//! encryption) addressed by an id derived from the signing key:
//! `agent_` + hex(SHA-256(signing_public)). The [`IdentityRegistry`] is
//! the single source of truth for key lookups, and every lookup is gated
//! by lifecycle status: only `active` identities resolve.
//!
//! Lifecycle: `active ⇄ suspended`, and any state may move to `revoked`,
//! which is terminal. A revoked entry stays in the registry for audit but
//! fails all cryptographic lookups; `deregister` removes the entry
//! entirely.

#![warn(missing_docs)]

pub mod error;
pub mod identity;
pub mod keystore;
pub mod registry;
pub mod signed_request;

pub use error::{IdentityError, Result};
pub use identity::{AgentId, Identity, IdentityStatus, LocalIdentity};
pub use keystore::Keystore;
pub use registry::IdentityRegistry;
pub use signed_request::{RequestVerifier, SignedRequest};
