//! The identity registry

use crate::error::{IdentityError, Result};
use crate::identity::{AgentId, Identity, IdentityStatus};
use arbor_crypto::PUBLIC_KEY_LEN;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct RegistryEntry {
    identity: Identity,
    status: IdentityStatus,
    status_reason: Option<String>,
    updated_at: DateTime<Utc>,
}

/// Registry mapping agent ids to public keys and lifecycle status.
///
/// All cryptographic lookups are status-gated: a suspended or revoked
/// identity yields a status-specific error, never a key. Revocation is
/// terminal; the entry remains for audit until `deregister`.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    entries: RwLock<HashMap<AgentId, RegistryEntry>>,
}

impl IdentityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity as `active`.
    ///
    /// Fails with `AlreadyRegistered` if the id exists with a non-revoked
    /// status, and with `IdentityRevoked` if the id was terminally
    /// revoked (revoked ids are never resurrected by re-registration).
    pub async fn register(&self, identity: Identity) -> Result<()> {
        let mut entries = self.entries.write().await;
        match entries.get(&identity.agent_id) {
            Some(entry) if entry.status == IdentityStatus::Revoked => {
                return Err(IdentityError::IdentityRevoked(identity.agent_id.clone()));
            }
            Some(_) => {
                return Err(IdentityError::AlreadyRegistered(identity.agent_id.clone()));
            }
            None => {}
        }
        tracing::debug!(agent_id = %identity.agent_id, "identity registered");
        entries.insert(
            identity.agent_id.clone(),
            RegistryEntry {
                identity,
                status: IdentityStatus::Active,
                status_reason: None,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Look up the signing public key of an `active` identity.
    pub async fn lookup(&self, agent_id: &AgentId) -> Result<[u8; PUBLIC_KEY_LEN]> {
        let entries = self.entries.read().await;
        let entry = Self::active_entry(&entries, agent_id)?;
        Ok(entry.identity.signing_public)
    }

    /// Look up the encryption public key of an `active` identity.
    pub async fn lookup_encryption_key(&self, agent_id: &AgentId) -> Result<[u8; PUBLIC_KEY_LEN]> {
        let entries = self.entries.read().await;
        let entry = Self::active_entry(&entries, agent_id)?;
        Ok(entry.identity.encryption_public)
    }

    /// The full public identity regardless of status, for audit surfaces.
    pub async fn get(&self, agent_id: &AgentId) -> Result<Identity> {
        let entries = self.entries.read().await;
        entries
            .get(agent_id)
            .map(|e| e.identity.clone())
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))
    }

    /// Current lifecycle status.
    pub async fn get_status(&self, agent_id: &AgentId) -> Result<IdentityStatus> {
        let entries = self.entries.read().await;
        entries
            .get(agent_id)
            .map(|e| e.status)
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))
    }

    /// Whether the identity exists and is `active`.
    pub async fn is_active(&self, agent_id: &AgentId) -> bool {
        matches!(self.get_status(agent_id).await, Ok(IdentityStatus::Active))
    }

    /// `active → suspended`. Fails on revoked identities.
    pub async fn suspend(&self, agent_id: &AgentId, reason: Option<String>) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(agent_id)
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))?;
        match entry.status {
            IdentityStatus::Revoked => Err(IdentityError::CannotSuspendRevoked(agent_id.clone())),
            _ => {
                entry.status = IdentityStatus::Suspended;
                entry.status_reason = reason;
                entry.updated_at = Utc::now();
                tracing::debug!(agent_id = %agent_id, "identity suspended");
                Ok(())
            }
        }
    }

    /// `suspended → active`. Fails on revoked and non-suspended identities.
    pub async fn resume(&self, agent_id: &AgentId) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(agent_id)
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))?;
        match entry.status {
            IdentityStatus::Revoked => Err(IdentityError::CannotResumeRevoked(agent_id.clone())),
            IdentityStatus::Active => Err(IdentityError::NotSuspended(agent_id.clone())),
            IdentityStatus::Suspended => {
                entry.status = IdentityStatus::Active;
                entry.status_reason = None;
                entry.updated_at = Utc::now();
                Ok(())
            }
        }
    }

    /// Any state → `revoked` (terminal). Idempotent on already-revoked.
    pub async fn revoke(&self, agent_id: &AgentId, reason: Option<String>) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(agent_id)
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))?;
        entry.status = IdentityStatus::Revoked;
        entry.status_reason = reason;
        entry.updated_at = Utc::now();
        tracing::debug!(agent_id = %agent_id, "identity revoked");
        Ok(())
    }

    /// Remove the entry entirely. Unlike `revoke`, nothing remains in the
    /// registry for this id; a later `register` starts from scratch.
    pub async fn deregister(&self, agent_id: &AgentId) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries
            .remove(agent_id)
            .map(|_| ())
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))
    }

    /// Ids of all entries, any status.
    pub async fn list(&self) -> Vec<AgentId> {
        self.entries.read().await.keys().cloned().collect()
    }

    fn active_entry<'a>(
        entries: &'a HashMap<AgentId, RegistryEntry>,
        agent_id: &AgentId,
    ) -> Result<&'a RegistryEntry> {
        let entry = entries
            .get(agent_id)
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))?;
        match entry.status {
            IdentityStatus::Active => Ok(entry),
            IdentityStatus::Suspended => Err(IdentityError::IdentitySuspended(agent_id.clone())),
            IdentityStatus::Revoked => Err(IdentityError::IdentityRevoked(agent_id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LocalIdentity;

    async fn registered() -> (IdentityRegistry, LocalIdentity) {
        let registry = IdentityRegistry::new();
        let local = LocalIdentity::generate(None);
        registry.register(local.identity.clone()).await.unwrap();
        (registry, local)
    }

    #[tokio::test]
    async fn test_lookup_gated_by_status() {
        let (registry, local) = registered().await;
        let id = local.agent_id().clone();

        assert_eq!(
            registry.lookup(&id).await.unwrap(),
            local.signing.public_bytes()
        );
        assert_eq!(
            registry.lookup_encryption_key(&id).await.unwrap(),
            local.encryption.public_bytes()
        );

        registry.suspend(&id, Some("audit hold".into())).await.unwrap();
        assert!(matches!(
            registry.lookup(&id).await,
            Err(IdentityError::IdentitySuspended(_))
        ));

        registry.resume(&id).await.unwrap();
        assert!(registry.lookup(&id).await.is_ok());

        registry.revoke(&id, None).await.unwrap();
        assert!(matches!(
            registry.lookup(&id).await,
            Err(IdentityError::IdentityRevoked(_))
        ));
        assert!(matches!(
            registry.lookup_encryption_key(&id).await,
            Err(IdentityError::IdentityRevoked(_))
        ));
    }

    #[tokio::test]
    async fn test_revoked_is_terminal() {
        let (registry, local) = registered().await;
        let id = local.agent_id().clone();
        registry.revoke(&id, None).await.unwrap();

        assert!(matches!(
            registry.suspend(&id, None).await,
            Err(IdentityError::CannotSuspendRevoked(_))
        ));
        assert!(matches!(
            registry.resume(&id).await,
            Err(IdentityError::CannotResumeRevoked(_))
        ));
        // Re-registration cannot resurrect a revoked id
        assert!(matches!(
            registry.register(local.identity.clone()).await,
            Err(IdentityError::IdentityRevoked(_))
        ));
        assert_eq!(
            registry.get_status(&id).await.unwrap(),
            IdentityStatus::Revoked
        );
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let (registry, local) = registered().await;
        assert!(matches!(
            registry.register(local.identity.clone()).await,
            Err(IdentityError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_deregister_removes_entirely() {
        let (registry, local) = registered().await;
        let id = local.agent_id().clone();

        registry.deregister(&id).await.unwrap();
        assert!(matches!(
            registry.lookup(&id).await,
            Err(IdentityError::NotFound(_))
        ));
        // A deregistered id may register again
        registry.register(local.identity.clone()).await.unwrap();
        assert!(registry.is_active(&id).await);
    }

    #[tokio::test]
    async fn test_resume_requires_suspended() {
        let (registry, local) = registered().await;
        assert!(matches!(
            registry.resume(local.agent_id()).await,
            Err(IdentityError::NotSuspended(_))
        ));
    }
}
