//! The authorization facade
//!
//! [`Arbor`] wires the registry, capability store, signer, constraint
//! enforcer, reflex engine, audit log, and approval service into the
//! ordered pipeline of one `authorize` call:
//!
//! 1. optional signed-request verification
//! 2. reflex pre-check
//! 3. capability lookup
//! 4. issuer signature verification
//! 5. delegation-chain verification
//! 6. constraint enforcement (consumes rate budget)
//! 7. approval escalation
//!
//! Every step that refuses emits an audit event under the call's trace
//! id before the denial is returned.

use crate::approval::{ApprovalProposal, ApprovalService};
use crate::config::SecurityConfig;
use crate::decision::{Decision, DenyReason};
use crate::error::{Result, SecurityError};
use crate::reflex::{Reflex, ReflexContext, ReflexEngine, ReflexOutcome};
use crate::roles::RoleAssignments;
use arbor_audit::{AuditEvent, AuditKind, AuditLog, TraceId};
use arbor_caps::{
    Capability, CapabilitySigner, CapabilityStore, CapsError, ConstraintEnforcer, Constraints,
    Enforcement, ResourceUri,
};
use arbor_crypto::SigningKeyPair;
use arbor_identity::{
    AgentId, Identity, IdentityRegistry, RequestVerifier, SignedRequest,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Per-call options for [`Arbor::authorize`].
#[derive(Default)]
pub struct AuthorizeOptions {
    /// Action verb for the reflex layer; defaults to the URI action
    pub action: Option<String>,

    /// Shell command or equivalent, for pattern reflexes
    pub command: Option<String>,

    /// When present, the request signature is verified first
    pub signed_request: Option<SignedRequest>,
}

/// The security facade.
pub struct Arbor {
    config: SecurityConfig,
    registry: Arc<IdentityRegistry>,
    store: Arc<CapabilityStore>,
    signer: CapabilitySigner,
    enforcer: ConstraintEnforcer,
    reflexes: std::sync::RwLock<ReflexEngine>,
    audit: Arc<AuditLog>,
    approvals: Option<Arc<dyn ApprovalService>>,
    verifier: RequestVerifier,
    roles: RoleAssignments,
}

impl Arbor {
    /// Build the facade and register the system authority's identity.
    pub async fn new(
        config: SecurityConfig,
        registry: Arc<IdentityRegistry>,
        approvals: Option<Arc<dyn ApprovalService>>,
    ) -> Result<Self> {
        let signer = CapabilitySigner::new(registry.clone());
        registry.register(signer.authority_identity()).await?;

        let store = Arc::new(CapabilityStore::with_quotas(config.store_quotas()));
        let enforcer = ConstraintEnforcer::new(
            config.limiter_config(),
            config.constraint_enforcement_enabled,
        );
        let verifier = RequestVerifier::new(config.replay_window_seconds);
        let roles = RoleAssignments::new(&config.roles);

        Ok(Self {
            config,
            registry,
            store,
            signer,
            enforcer,
            reflexes: std::sync::RwLock::new(ReflexEngine::with_builtins()),
            audit: Arc::new(AuditLog::new()),
            approvals,
            verifier,
            roles,
        })
    }

    /// The capability store.
    pub fn store(&self) -> &Arc<CapabilityStore> {
        &self.store
    }

    /// The audit log.
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// The identity registry.
    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// The system authority's agent id.
    pub fn authority_id(&self) -> &AgentId {
        self.signer.authority_id()
    }

    /// Register an additional reflex.
    pub fn add_reflex(&self, reflex: Reflex) {
        self.reflexes
            .write()
            .expect("reflex engine lock is never poisoned")
            .add(reflex);
    }

    /// Register an identity and record the event.
    pub async fn register_identity(&self, identity: Identity) -> Result<()> {
        let agent_id = identity.agent_id.clone();
        self.registry.register(identity).await?;
        self.audit
            .append(
                AuditEvent::new(AuditKind::IdentityRegistered, "registered")
                    .agent(agent_id.as_str()),
            )
            .await;
        Ok(())
    }

    /// Suspend an identity.
    pub async fn suspend_identity(&self, agent_id: &AgentId, reason: Option<String>) -> Result<()> {
        self.registry.suspend(agent_id, reason.clone()).await?;
        self.audit
            .append(
                AuditEvent::new(
                    AuditKind::IdentitySuspended,
                    reason.unwrap_or_else(|| "suspended".to_string()),
                )
                .agent(agent_id.as_str()),
            )
            .await;
        Ok(())
    }

    /// Resume a suspended identity.
    pub async fn resume_identity(&self, agent_id: &AgentId) -> Result<()> {
        self.registry.resume(agent_id).await?;
        self.audit
            .append(AuditEvent::new(AuditKind::IdentityResumed, "resumed").agent(agent_id.as_str()))
            .await;
        Ok(())
    }

    /// Terminally revoke an identity and every capability it holds.
    ///
    /// Returns the number of capabilities revoked as a side effect.
    pub async fn revoke_identity(
        &self,
        agent_id: &AgentId,
        reason: Option<String>,
    ) -> Result<usize> {
        self.registry.revoke(agent_id, reason.clone()).await?;
        let revoked = self.store.revoke_all(agent_id).await;
        self.audit
            .append(
                AuditEvent::new(
                    AuditKind::IdentityRevoked,
                    reason.unwrap_or_else(|| "revoked".to_string()),
                )
                .agent(agent_id.as_str())
                .metadata(serde_json::json!({"capabilities_revoked": revoked})),
            )
            .await;
        Ok(revoked)
    }

    /// Issue a capability signed by the system authority.
    pub async fn grant(
        &self,
        principal: &AgentId,
        resource: &str,
        constraints: Constraints,
        delegation_depth: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Capability> {
        let uri = ResourceUri::parse(resource)?;
        let cap = self.signer.grant(
            principal.clone(),
            uri,
            constraints,
            delegation_depth,
            expires_at,
        );
        self.store.put(cap.clone()).await?;
        self.audit
            .append(
                AuditEvent::new(AuditKind::CapabilityGranted, "granted")
                    .agent(principal.as_str())
                    .resource(resource)
                    .metadata(serde_json::json!({"capability_id": cap.id})),
            )
            .await;
        Ok(cap)
    }

    /// Delegate an existing capability to a new principal.
    pub async fn delegate(
        &self,
        parent_capability_id: &str,
        delegator: &SigningKeyPair,
        delegatee: &AgentId,
        constraints: Constraints,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Capability> {
        let child = self
            .signer
            .delegate(
                &self.store,
                parent_capability_id,
                delegator,
                delegatee.clone(),
                constraints,
                expires_at,
            )
            .await?;
        self.audit
            .append(
                AuditEvent::new(AuditKind::CapabilityDelegated, "delegated")
                    .agent(delegatee.as_str())
                    .resource(&child.resource_uri.to_string())
                    .metadata(serde_json::json!({
                        "parent_capability_id": parent_capability_id,
                        "capability_id": child.id,
                        "delegation_depth": child.delegation_depth,
                    })),
            )
            .await;
        Ok(child)
    }

    /// Revoke one capability.
    pub async fn revoke_capability(&self, capability_id: &str) -> Result<()> {
        let cap = self.store.revoke(capability_id).await?;
        self.audit
            .append(
                AuditEvent::new(AuditKind::CapabilityRevoked, "revoked")
                    .agent(cap.principal_id.as_str())
                    .resource(&cap.resource_uri.to_string())
                    .metadata(serde_json::json!({"capability_id": capability_id})),
            )
            .await;
        Ok(())
    }

    /// Revoke a capability and its whole delegation subtree.
    pub async fn cascade_revoke(&self, capability_id: &str) -> Result<usize> {
        let count = self.store.cascade_revoke(capability_id).await?;
        self.audit
            .append(
                AuditEvent::new(AuditKind::CascadeRevoked, "cascade revoked")
                    .metadata(serde_json::json!({
                        "root_capability_id": capability_id,
                        "revoked": count,
                    })),
            )
            .await;
        Ok(count)
    }

    /// Grant a role's capability bundle to a principal.
    ///
    /// Idempotent per (principal, resource): re-assigning a role never
    /// mints duplicate tokens. Returns the newly granted capabilities.
    pub async fn assign_role(&self, principal: &AgentId, role: &str) -> Result<Vec<Capability>> {
        let uris = self
            .roles
            .resolve(role)
            .ok_or_else(|| SecurityError::UnknownRole(role.to_string()))?
            .to_vec();

        let held: Vec<String> = self
            .store
            .list_for_principal(principal, false)
            .await
            .into_iter()
            .map(|cap| cap.resource_uri.to_string())
            .collect();

        let mut granted = Vec::new();
        for uri in uris {
            if held.contains(&uri) {
                continue;
            }
            // Role bundles are leaf grants; delegation needs an explicit
            // grant with a depth budget.
            granted.push(
                self.grant(principal, &uri, Constraints::default(), 0, None)
                    .await?,
            );
        }
        Ok(granted)
    }

    /// The full authorization pipeline.
    pub async fn authorize(
        &self,
        principal: &AgentId,
        resource: &str,
        opts: AuthorizeOptions,
    ) -> Result<Decision> {
        let uri = ResourceUri::parse(resource)?;
        let trace = TraceId::generate();

        // 1. Signed-request verification, when the caller asks for it.
        if let Some(request) = &opts.signed_request {
            if let Err(reason) = self.verify_signed_request(principal, request).await {
                self.audit
                    .append(
                        AuditEvent::new(AuditKind::IdentityVerificationFailed, reason)
                            .agent(principal.as_str())
                            .resource(resource)
                            .trace(trace.clone())
                            .metadata(serde_json::json!({
                                "nonce": hex::encode(request.nonce),
                                "signed_at": request.signed_at.to_rfc3339(),
                            })),
                    )
                    .await;
                return Ok(Decision::Denied {
                    reason: DenyReason::IdentityVerificationFailed,
                });
            }
            self.audit
                .append(
                    AuditEvent::new(AuditKind::IdentityVerificationSucceeded, "verified")
                        .agent(principal.as_str())
                        .trace(trace.clone())
                        .metadata(serde_json::json!({
                            "nonce": hex::encode(request.nonce),
                            "signed_at": request.signed_at.to_rfc3339(),
                        })),
                )
                .await;
        }

        // 2. Reflex pre-check, before any capability work.
        let reflex_ctx = ReflexContext {
            command: opts.command.clone(),
            path: Some(uri.path()),
            action: Some(opts.action.clone().unwrap_or_else(|| uri.action.clone())),
            ..Default::default()
        };
        // The guard must drop before any await below.
        let reflex_outcome = {
            let engine = self
                .reflexes
                .read()
                .expect("reflex engine lock is never poisoned");
            engine.check(&reflex_ctx)
        };
        let warnings = match reflex_outcome {
            ReflexOutcome::Blocked { reflex_id, message } => {
                self.deny(
                    principal,
                    resource,
                    &trace,
                    format!("blocked by reflex {reflex_id}"),
                )
                .await;
                return Ok(Decision::Denied {
                    reason: DenyReason::ReflexBlocked { reflex_id, message },
                });
            }
            ReflexOutcome::Warned(warned) => warned
                .into_iter()
                .map(|(_, message)| message)
                .collect(),
            ReflexOutcome::Ok => Vec::new(),
        };

        // 3–5. Find a capability that survives verification.
        let candidates = self.store.authorizing_candidates(principal, &uri).await;
        if candidates.is_empty() {
            self.deny(principal, resource, &trace, "no_capability".to_string())
                .await;
            return Ok(Decision::Denied {
                reason: DenyReason::NoCapability,
            });
        }

        let Some(cap) = self.first_verified(candidates, &trace).await else {
            self.deny(principal, resource, &trace, "unauthorized".to_string())
                .await;
            return Ok(Decision::Denied {
                reason: DenyReason::Unauthorized,
            });
        };

        // 6. Constraints, consuming rate budget.
        match self.enforcer.enforce(&cap, &uri, true).await {
            Ok(Enforcement::Ok) => {}
            Ok(Enforcement::Violated(violation)) => {
                self.audit
                    .append(
                        AuditEvent::new(
                            AuditKind::AuthorizationDenied,
                            format!("constraint_violated: {}", violation.kind()),
                        )
                        .agent(principal.as_str())
                        .resource(resource)
                        .trace(trace.clone())
                        .metadata(serde_json::to_value(&violation).unwrap_or_default()),
                    )
                    .await;
                return Ok(Decision::Denied {
                    reason: DenyReason::ConstraintViolated(violation),
                });
            }
            Ok(Enforcement::NeedsApproval) => {
                return self
                    .escalate(principal, resource, &opts, &cap, &trace)
                    .await;
            }
            Err(CapsError::PathTraversal(path)) => {
                self.deny(principal, resource, &trace, "path_traversal".to_string())
                    .await;
                return Ok(Decision::Denied {
                    reason: DenyReason::PathTraversal { path },
                });
            }
            Err(e) => return Err(e.into()),
        }

        // 7. Granted.
        self.audit
            .append(
                AuditEvent::new(AuditKind::AuthorizationGranted, "authorized")
                    .agent(principal.as_str())
                    .resource(resource)
                    .trace(trace)
                    .metadata(serde_json::json!({
                        "capability_id": cap.id,
                        "warnings": warnings.len(),
                    })),
            )
            .await;
        Ok(Decision::Authorized {
            capability_id: cap.id,
            warnings,
        })
    }

    /// Non-consuming, non-emitting authorization predicate.
    ///
    /// Equivalent to the lookup and verification steps of the pipeline:
    /// no reflexes, no constraints, no budget consumption, no audit
    /// events, no approval submission.
    pub async fn can(&self, principal: &AgentId, resource: &str) -> Result<bool> {
        let uri = ResourceUri::parse(resource)?;
        let candidates = self.store.authorizing_candidates(principal, &uri).await;
        for cap in candidates {
            if self.verify_candidate(&cap).await.is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Sweep stale rate-limiter buckets; returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        self.enforcer.limiter().sweep_stale().await
    }

    async fn verify_signed_request(
        &self,
        principal: &AgentId,
        request: &SignedRequest,
    ) -> std::result::Result<(), String> {
        if request.agent_id != *principal {
            return Err("request signer does not match principal".to_string());
        }
        self.verifier
            .verify(request, &self.registry)
            .await
            .map_err(|e| e.to_string())
    }

    async fn first_verified(
        &self,
        candidates: Vec<Capability>,
        trace: &TraceId,
    ) -> Option<Capability> {
        for cap in candidates {
            match self.verify_candidate(&cap).await {
                Ok(()) => return Some(cap),
                Err(detail) => {
                    // Cryptographic detail goes to the audit log, never
                    // to the caller.
                    tracing::debug!(capability = %cap.id, %detail, "candidate rejected");
                    self.audit
                        .append(
                            AuditEvent::new(AuditKind::AuthorizationDenied, "candidate rejected")
                                .trace(trace.clone())
                                .metadata(serde_json::json!({
                                    "capability_id": cap.id,
                                    "detail": detail.to_string(),
                                })),
                        )
                        .await;
                }
            }
        }
        None
    }

    async fn verify_candidate(&self, cap: &Capability) -> arbor_caps::Result<()> {
        // Lifecycle gating is independent of the crypto toggles: a
        // suspended or revoked principal never authorizes.
        self.registry.lookup(&cap.principal_id).await?;
        if self.config.capability_signing_required {
            self.signer.verify_capability(cap).await?;
        }
        if self.config.delegation_chain_verification_enabled {
            self.signer.verify_delegation_chain(cap).await?;
        }
        Ok(())
    }

    async fn escalate(
        &self,
        principal: &AgentId,
        resource: &str,
        opts: &AuthorizeOptions,
        cap: &Capability,
        trace: &TraceId,
    ) -> Result<Decision> {
        let Some(approvals) = self
            .approvals
            .as_ref()
            .filter(|_| self.config.consensus_escalation_enabled)
        else {
            self.deny(principal, resource, trace, "escalation_disabled".to_string())
                .await;
            return Ok(Decision::Denied {
                reason: DenyReason::EscalationDisabled,
            });
        };

        let proposal = ApprovalProposal {
            principal: principal.clone(),
            resource: resource.to_string(),
            action: opts.action.clone(),
            capability_id: cap.id.clone(),
            requested_at: Utc::now(),
        };
        let proposal_id = approvals
            .submit_proposal(proposal)
            .await
            .map_err(|e| SecurityError::ApprovalSubmission(e.to_string()))?;

        self.audit
            .append(
                AuditEvent::new(AuditKind::AuthorizationPending, "pending approval")
                    .agent(principal.as_str())
                    .resource(resource)
                    .trace(trace.clone())
                    .metadata(serde_json::json!({
                        "proposal_id": proposal_id,
                        "capability_id": cap.id,
                    })),
            )
            .await;
        Ok(Decision::PendingApproval { proposal_id })
    }

    async fn deny(&self, principal: &AgentId, resource: &str, trace: &TraceId, reason: String) {
        self.audit
            .append(
                AuditEvent::new(AuditKind::AuthorizationDenied, reason)
                    .agent(principal.as_str())
                    .resource(resource)
                    .trace(trace.clone()),
            )
            .await;
    }
}

impl std::fmt::Debug for Arbor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbor")
            .field("authority_id", self.signer.authority_id())
            .finish_non_exhaustive()
    }
}
