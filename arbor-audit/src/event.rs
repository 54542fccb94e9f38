//! Audit event model

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Kinds of recorded events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// An authorize call granted access
    AuthorizationGranted,
    /// An authorize call denied access
    AuthorizationDenied,
    /// An authorize call escalated to approval
    AuthorizationPending,
    /// A capability was issued
    CapabilityGranted,
    /// A capability was delegated to a new principal
    CapabilityDelegated,
    /// A single capability was revoked
    CapabilityRevoked,
    /// A capability subtree was revoked
    CascadeRevoked,
    /// An identity entered the registry
    IdentityRegistered,
    /// An identity was suspended
    IdentitySuspended,
    /// A suspended identity was resumed
    IdentityResumed,
    /// An identity was terminally revoked
    IdentityRevoked,
    /// A signed request verified successfully
    IdentityVerificationSucceeded,
    /// A signed request failed verification
    IdentityVerificationFailed,
    /// A channel was created
    ChannelCreated,
    /// A member accepted an invitation
    ChannelMemberJoined,
    /// A member left a channel
    ChannelMemberLeft,
    /// The creator revoked a member
    ChannelMemberRevoked,
    /// A channel key was rotated
    ChannelKeyRotated,
    /// The last member left and the channel was destroyed
    ChannelDestroyed,
}

/// Correlation id for all events of one user action.
///
/// Format: `trace_` followed by 16 hex characters (8 random bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a fresh trace id from the system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(format!("trace_{}", hex::encode(bytes)))
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One recorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event kind
    pub kind: AuditKind,

    /// When the event was recorded
    pub timestamp: DateTime<Utc>,

    /// Principal or agent the event concerns, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Resource URI the event concerns, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Outcome or reason, human-readable
    pub outcome: String,

    /// Correlation id across one user action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,

    /// Kind-specific detail (nonce, signed-at, counts, versions, ...)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    /// Build an event stamped with the current time.
    pub fn new(kind: AuditKind, outcome: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            agent_id: None,
            resource: None,
            outcome: outcome.into(),
            trace_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach the agent this event concerns.
    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Attach the resource this event concerns.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attach a correlation id.
    pub fn trace(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Attach kind-specific metadata.
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
