//! Approval escalation
//!
//! Capabilities carrying `requires_approval` route through an injected
//! approval collaborator (a deliberation council, a human queue). The
//! facade submits a proposal and returns `PendingApproval` synchronously;
//! the service owns its own timeout and the eventual verdict.

use arbor_identity::AgentId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A request escalated for approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalProposal {
    /// Principal whose request escalated
    pub principal: AgentId,

    /// Requested resource
    pub resource: String,

    /// Requested action, if the caller supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Capability that demanded the approval
    pub capability_id: String,

    /// Submission timestamp
    pub requested_at: DateTime<Utc>,
}

/// An injected approval collaborator.
#[async_trait]
pub trait ApprovalService: Send + Sync {
    /// Submit a proposal; returns its id for later correlation.
    async fn submit_proposal(&self, proposal: ApprovalProposal) -> crate::Result<String>;
}

/// Test and development service: accepts every proposal immediately.
#[derive(Debug, Default)]
pub struct AutoApprovalService;

#[async_trait]
impl ApprovalService for AutoApprovalService {
    async fn submit_proposal(&self, proposal: ApprovalProposal) -> crate::Result<String> {
        let proposal_id = format!("proposal_{}", uuid::Uuid::new_v4().simple());
        tracing::debug!(
            principal = %proposal.principal,
            resource = %proposal.resource,
            proposal_id = %proposal_id,
            "auto-approval proposal accepted"
        );
        Ok(proposal_id)
    }
}
