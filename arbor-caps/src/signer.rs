//! Capability signing and delegation
//!
//! The system authority's private key lives inside [`CapabilitySigner`]
//! and is only reachable through `grant` and `delegate`; it is never
//! exposed raw. Issued capabilities carry a detached Ed25519 signature
//! over their canonical encoding; delegated capabilities additionally
//! carry a chain of per-record delegator signatures that
//! [`CapabilitySigner::verify_delegation_chain`] replays root-first.

use crate::capability::{signing_bytes_for, Capability, Constraints, DelegationRecord};
use crate::error::{CapsError, Result};
use crate::store::CapabilityStore;
use crate::uri::ResourceUri;
use arbor_crypto::{verify, EncryptionKeyPair, SigningKeyPair};
use arbor_identity::{AgentId, Identity, IdentityRegistry};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Signs capabilities with the system authority key and verifies
/// signatures and delegation chains against the identity registry.
pub struct CapabilitySigner {
    authority: SigningKeyPair,
    authority_encryption: EncryptionKeyPair,
    authority_id: AgentId,
    registry: Arc<IdentityRegistry>,
}

impl CapabilitySigner {
    /// Create a signer with a freshly generated authority keypair.
    pub fn new(registry: Arc<IdentityRegistry>) -> Self {
        Self::with_authority(SigningKeyPair::generate(), registry)
    }

    /// Create a signer around an existing authority keypair.
    pub fn with_authority(authority: SigningKeyPair, registry: Arc<IdentityRegistry>) -> Self {
        let authority_id = AgentId::derive(&authority.public_bytes());
        Self {
            authority,
            authority_encryption: EncryptionKeyPair::generate(),
            authority_id,
            registry,
        }
    }

    /// The authority's agent id.
    pub fn authority_id(&self) -> &AgentId {
        &self.authority_id
    }

    /// The authority's public identity, for registry registration.
    ///
    /// Capability verification resolves the issuer key through the
    /// registry, so the authority must be registered like any other
    /// identity before issued tokens verify.
    pub fn authority_identity(&self) -> Identity {
        Identity::new(
            self.authority.public_bytes(),
            self.authority_encryption.public_bytes(),
            Some("system-authority".to_string()),
        )
    }

    /// Issue a root capability to `principal`, signed by the authority.
    pub fn grant(
        &self,
        principal: AgentId,
        resource_uri: ResourceUri,
        constraints: Constraints,
        delegation_depth: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Capability {
        let mut cap = Capability {
            id: Capability::new_id(),
            resource_uri,
            principal_id: principal,
            issuer_id: self.authority_id.clone(),
            issuer_signature: [0u8; arbor_crypto::SIGNATURE_LEN],
            constraints,
            delegation_depth,
            parent_capability_id: None,
            delegation_chain: Vec::new(),
            granted_at: Utc::now(),
            expires_at,
        };
        cap.issuer_signature = self.authority.sign(&cap.canonical_bytes());
        cap
    }

    /// Verify the issuer signature over a capability's canonical bytes.
    ///
    /// The issuer key is resolved through the registry, so a suspended or
    /// revoked issuer fails verification along with any tampered field.
    pub async fn verify_capability(&self, cap: &Capability) -> Result<()> {
        let issuer_key = self
            .registry
            .lookup(&cap.issuer_id)
            .await
            .map_err(|_| CapsError::InvalidCapabilitySignature(cap.id.clone()))?;

        if verify(&cap.canonical_bytes(), &cap.issuer_signature, &issuer_key) {
            Ok(())
        } else {
            Err(CapsError::InvalidCapabilitySignature(cap.id.clone()))
        }
    }

    /// Delegate `parent_cap_id` to `delegatee` with narrowed constraints.
    ///
    /// The delegator must hold the private key of the parent capability's
    /// principal, whose identity must be active. The child's depth is the
    /// parent's minus one, its chain extends the parent's by one record
    /// signed with the delegator key, and the whole child is endorsed by
    /// the authority and written to the store.
    pub async fn delegate(
        &self,
        store: &CapabilityStore,
        parent_cap_id: &str,
        delegator: &SigningKeyPair,
        delegatee: AgentId,
        constraints: Constraints,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Capability> {
        let parent = store.get(parent_cap_id).await?;

        let delegator_key = self.registry.lookup(&parent.principal_id).await?;
        if delegator_key != delegator.public_bytes() {
            return Err(CapsError::DelegatorKeyMismatch(parent.principal_id.clone()));
        }

        if parent.delegation_depth <= 0 {
            return Err(CapsError::DelegationDepthExhausted(parent.id.clone()));
        }

        if !constraints.narrows(&parent.constraints) {
            return Err(CapsError::ConstraintsNotNarrowed(format!(
                "delegation of {} to {}",
                parent.id, delegatee
            )));
        }

        let child_id = Capability::new_id();

        let record = DelegationRecord {
            delegator_id: parent.principal_id.clone(),
            delegatee_id: delegatee.clone(),
            parent_capability_id: parent.id.clone(),
            capability_id: child_id.clone(),
            constraints: constraints.clone(),
            delegated_at: Utc::now(),
            signature: delegator.sign(&signing_bytes_for(
                &parent.id,
                &child_id,
                &delegatee,
                &constraints,
            )),
        };

        let mut chain = parent.delegation_chain.clone();
        chain.push(Arc::new(record));

        // A child never outlives its parent.
        let expires_at = match (expires_at, parent.expires_at) {
            (Some(child), Some(parent)) => Some(child.min(parent)),
            (Some(child), None) => Some(child),
            (None, inherited) => inherited,
        };

        let mut child = Capability {
            id: child_id,
            resource_uri: parent.resource_uri.clone(),
            principal_id: delegatee,
            issuer_id: self.authority_id.clone(),
            issuer_signature: [0u8; arbor_crypto::SIGNATURE_LEN],
            constraints,
            delegation_depth: parent.delegation_depth - 1,
            parent_capability_id: Some(parent.id.clone()),
            delegation_chain: chain,
            granted_at: Utc::now(),
            expires_at,
        };
        child.issuer_signature = self.authority.sign(&child.canonical_bytes());

        store.put(child.clone()).await?;
        tracing::debug!(
            parent = %parent.id,
            child = %child.id,
            delegatee = %child.principal_id,
            "capability delegated"
        );
        Ok(child)
    }

    /// Replay a capability's delegation chain root-first.
    ///
    /// Checks structural continuity (each record's delegator is the
    /// previous record's delegatee; the last record minted this
    /// capability) and every delegator signature, resolving keys through
    /// the registry. An empty chain verifies trivially. Every failure
    /// surfaces as `BrokenDelegationChain`.
    pub async fn verify_delegation_chain(&self, cap: &Capability) -> Result<()> {
        let chain = &cap.delegation_chain;
        if chain.is_empty() {
            return Ok(());
        }

        let last = chain.last().expect("chain is non-empty");
        if last.capability_id != cap.id
            || last.delegatee_id != cap.principal_id
            || Some(last.parent_capability_id.as_str()) != cap.parent_capability_id.as_deref()
        {
            return Err(CapsError::BrokenDelegationChain(format!(
                "terminal record does not match capability {}",
                cap.id
            )));
        }

        for (i, record) in chain.iter().enumerate() {
            if i > 0 {
                let prev = &chain[i - 1];
                if record.delegator_id != prev.delegatee_id
                    || record.parent_capability_id != prev.capability_id
                {
                    return Err(CapsError::BrokenDelegationChain(format!(
                        "record {i} is not anchored to record {}",
                        i - 1
                    )));
                }
            }

            let delegator_key =
                self.registry
                    .lookup(&record.delegator_id)
                    .await
                    .map_err(|e| {
                        CapsError::BrokenDelegationChain(format!(
                            "delegator {} unresolvable: {e}",
                            record.delegator_id
                        ))
                    })?;

            if !verify(&record.signing_bytes(), &record.signature, &delegator_key) {
                return Err(CapsError::BrokenDelegationChain(format!(
                    "record {i} signature invalid (delegator {})",
                    record.delegator_id
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CapabilitySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySigner")
            .field("authority_id", &self.authority_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_identity::LocalIdentity;

    struct Fixture {
        registry: Arc<IdentityRegistry>,
        store: CapabilityStore,
        signer: CapabilitySigner,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(IdentityRegistry::new());
        let signer = CapabilitySigner::new(registry.clone());
        registry
            .register(signer.authority_identity())
            .await
            .unwrap();
        Fixture {
            registry,
            store: CapabilityStore::new(),
            signer,
        }
    }

    async fn member(fx: &Fixture) -> LocalIdentity {
        let local = LocalIdentity::generate(None);
        fx.registry.register(local.identity.clone()).await.unwrap();
        local
    }

    fn uri(s: &str) -> ResourceUri {
        ResourceUri::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_grant_verifies() {
        let fx = fixture().await;
        let alice = member(&fx).await;

        let cap = fx.signer.grant(
            alice.agent_id().clone(),
            uri("arbor://fs/read/docs"),
            Constraints::default(),
            3,
            None,
        );
        fx.signer.verify_capability(&cap).await.unwrap();
        fx.signer.verify_delegation_chain(&cap).await.unwrap();
    }

    #[tokio::test]
    async fn test_tampered_capability_fails_verification() {
        let fx = fixture().await;
        let alice = member(&fx).await;
        let mallory = member(&fx).await;

        let cap = fx.signer.grant(
            alice.agent_id().clone(),
            uri("arbor://fs/read/docs"),
            Constraints::default(),
            3,
            None,
        );

        let mut stolen = cap.clone();
        stolen.principal_id = mallory.agent_id().clone();
        assert!(matches!(
            fx.signer.verify_capability(&stolen).await,
            Err(CapsError::InvalidCapabilitySignature(_))
        ));

        let mut widened = cap.clone();
        widened.delegation_depth = 10;
        assert!(matches!(
            fx.signer.verify_capability(&widened).await,
            Err(CapsError::InvalidCapabilitySignature(_))
        ));

        let mut extended = cap;
        extended.expires_at = None;
        extended.resource_uri = uri("arbor://fs/read/**");
        assert!(matches!(
            fx.signer.verify_capability(&extended).await,
            Err(CapsError::InvalidCapabilitySignature(_))
        ));
    }

    #[tokio::test]
    async fn test_delegation_roundtrip() {
        let fx = fixture().await;
        let parent_holder = member(&fx).await;
        let child_holder = member(&fx).await;

        let parent = fx.signer.grant(
            parent_holder.agent_id().clone(),
            uri("arbor://fs/read/**"),
            Constraints::default(),
            3,
            None,
        );
        fx.store.put(parent.clone()).await.unwrap();

        let child = fx
            .signer
            .delegate(
                &fx.store,
                &parent.id,
                &parent_holder.signing,
                child_holder.agent_id().clone(),
                Constraints::default(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(child.delegation_depth, 2);
        assert_eq!(child.parent_capability_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(child.chain_len(), 1);
        fx.signer.verify_capability(&child).await.unwrap();
        fx.signer.verify_delegation_chain(&child).await.unwrap();

        // Two-level chain
        let grandchild_holder = member(&fx).await;
        let grandchild = fx
            .signer
            .delegate(
                &fx.store,
                &child.id,
                &child_holder.signing,
                grandchild_holder.agent_id().clone(),
                Constraints::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(grandchild.delegation_depth, 1);
        assert_eq!(grandchild.chain_len(), 2);
        fx.signer
            .verify_delegation_chain(&grandchild)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delegate_requires_matching_key_and_depth() {
        let fx = fixture().await;
        let holder = member(&fx).await;
        let target = member(&fx).await;
        let imposter = LocalIdentity::generate(None);

        let parent = fx.signer.grant(
            holder.agent_id().clone(),
            uri("arbor://fs/read/docs"),
            Constraints::default(),
            1,
            None,
        );
        fx.store.put(parent.clone()).await.unwrap();

        // Wrong private key
        assert!(matches!(
            fx.signer
                .delegate(
                    &fx.store,
                    &parent.id,
                    &imposter.signing,
                    target.agent_id().clone(),
                    Constraints::default(),
                    None,
                )
                .await,
            Err(CapsError::DelegatorKeyMismatch(_))
        ));

        // Exhaust the depth budget
        let child = fx
            .signer
            .delegate(
                &fx.store,
                &parent.id,
                &holder.signing,
                target.agent_id().clone(),
                Constraints::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(child.delegation_depth, 0);
        assert!(matches!(
            fx.signer
                .delegate(
                    &fx.store,
                    &child.id,
                    &target.signing,
                    holder.agent_id().clone(),
                    Constraints::default(),
                    None,
                )
                .await,
            Err(CapsError::DelegationDepthExhausted(_))
        ));
    }

    #[tokio::test]
    async fn test_delegate_rejects_widened_constraints() {
        let fx = fixture().await;
        let holder = member(&fx).await;
        let target = member(&fx).await;

        let parent = fx.signer.grant(
            holder.agent_id().clone(),
            uri("arbor://fs/read/docs"),
            Constraints {
                rate_limit: Some(10),
                ..Default::default()
            },
            2,
            None,
        );
        fx.store.put(parent.clone()).await.unwrap();

        assert!(matches!(
            fx.signer
                .delegate(
                    &fx.store,
                    &parent.id,
                    &holder.signing,
                    target.agent_id().clone(),
                    Constraints {
                        rate_limit: Some(100),
                        ..Default::default()
                    },
                    None,
                )
                .await,
            Err(CapsError::ConstraintsNotNarrowed(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_chain_record_breaks_verification() {
        let fx = fixture().await;
        let holder = member(&fx).await;
        let target = member(&fx).await;

        let parent = fx.signer.grant(
            holder.agent_id().clone(),
            uri("arbor://fs/read/**"),
            Constraints::default(),
            3,
            None,
        );
        fx.store.put(parent.clone()).await.unwrap();

        let child = fx
            .signer
            .delegate(
                &fx.store,
                &parent.id,
                &holder.signing,
                target.agent_id().clone(),
                Constraints::default(),
                None,
            )
            .await
            .unwrap();

        // Corrupt the single record's signature and re-insert
        let mut tampered = child.clone();
        let mut record = (*tampered.delegation_chain[0]).clone();
        record.signature[0] ^= 0xff;
        tampered.delegation_chain[0] = Arc::new(record);

        assert!(matches!(
            fx.signer.verify_delegation_chain(&tampered).await,
            Err(CapsError::BrokenDelegationChain(_))
        ));
    }

    #[tokio::test]
    async fn test_revoked_delegator_breaks_chain() {
        let fx = fixture().await;
        let holder = member(&fx).await;
        let target = member(&fx).await;

        let parent = fx.signer.grant(
            holder.agent_id().clone(),
            uri("arbor://fs/read/**"),
            Constraints::default(),
            3,
            None,
        );
        fx.store.put(parent.clone()).await.unwrap();
        let child = fx
            .signer
            .delegate(
                &fx.store,
                &parent.id,
                &holder.signing,
                target.agent_id().clone(),
                Constraints::default(),
                None,
            )
            .await
            .unwrap();

        fx.registry.revoke(holder.agent_id(), None).await.unwrap();
        assert!(matches!(
            fx.signer.verify_delegation_chain(&child).await,
            Err(CapsError::BrokenDelegationChain(_))
        ));
    }

    #[tokio::test]
    async fn test_child_never_outlives_parent() {
        let fx = fixture().await;
        let holder = member(&fx).await;
        let target = member(&fx).await;

        let soon = Utc::now() + chrono::Duration::hours(1);
        let parent = fx.signer.grant(
            holder.agent_id().clone(),
            uri("arbor://fs/read/docs"),
            Constraints::default(),
            2,
            Some(soon),
        );
        fx.store.put(parent.clone()).await.unwrap();

        let child = fx
            .signer
            .delegate(
                &fx.store,
                &parent.id,
                &holder.signing,
                target.agent_id().clone(),
                Constraints::default(),
                Some(Utc::now() + chrono::Duration::days(30)),
            )
            .await
            .unwrap();
        assert_eq!(child.expires_at, Some(soon));
    }
}
