//! # arbor-channels: Confidential channels between agents
//!
//! Two communication shapes, both forward-secure:
//!
//! - [`RatchetSession`]: a pairwise Signal-style double ratchet with a
//!   skipped-key window for out-of-order delivery.
//! - [`ChannelManager`]: multi-member group channels with one symmetric
//!   key per channel, sealed invitations, and key rotation on membership
//!   change or timer. Keys live in each member's [`Keychain`], never in
//!   the channel record.
//!
//! Every membership transition emits an audit event through the shared
//! [`arbor_audit::AuditLog`].

#![warn(missing_docs)]

pub mod channel;
pub mod error;
pub mod keychain;
pub mod ratchet;

pub use channel::{
    Channel, ChannelEnvelope, ChannelManager, ChannelManagerConfig, Invitation, LeaveOutcome,
    RotationOutcome,
};
pub use error::{ChannelError, Result};
pub use keychain::Keychain;
pub use ratchet::{MessageHeader, RatchetMessage, RatchetSession};
