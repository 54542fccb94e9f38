//! The capability store
//!
//! Authoritative `cap_id → capability` mapping with three secondary
//! indices kept atomically under one write lock:
//!
//! - `by_principal` for per-agent listing and bulk revocation
//! - `by_parent` for cascade revocation of delegation subtrees
//! - `by_target` (`scheme/kind/action` buckets) for authorization lookup
//!
//! Expiry is observed lazily: a read that encounters an expired token
//! reports `CapabilityExpired` and removes it from every index.

use crate::capability::Capability;
use crate::error::{CapsError, QuotaKind, Result};
use crate::uri::ResourceUri;
use arbor_identity::AgentId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

/// Store quotas, checked on every `put` while enforcement is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreQuotas {
    /// Maximum capabilities per principal
    pub max_capabilities_per_agent: usize,
    /// Maximum capabilities in the store
    pub max_global_capabilities: usize,
    /// Maximum admissible `delegation_depth` value
    pub max_delegation_depth: i64,
    /// Master toggle; when false `put` admits anything
    pub enforcement_enabled: bool,
}

impl Default for StoreQuotas {
    fn default() -> Self {
        Self {
            max_capabilities_per_agent: 100,
            max_global_capabilities: 10_000,
            max_delegation_depth: 5,
            enforcement_enabled: true,
        }
    }
}

/// Counters reported by [`CapabilityStore::stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Tokens currently stored (expired-but-unobserved included)
    pub total: usize,
    /// Principals with at least one token
    pub principals: usize,
    /// Tokens with a parent (delegated)
    pub delegated: usize,
    /// Quotas in force
    pub quotas: StoreQuotas,
}

#[derive(Debug, Default)]
struct StoreInner {
    caps: HashMap<String, Capability>,
    by_principal: HashMap<AgentId, HashSet<String>>,
    by_parent: HashMap<String, HashSet<String>>,
    by_target: HashMap<(String, String, String), HashSet<String>>,
}

impl StoreInner {
    fn insert(&mut self, cap: Capability) {
        self.remove(&cap.id);
        self.by_principal
            .entry(cap.principal_id.clone())
            .or_default()
            .insert(cap.id.clone());
        if let Some(parent) = &cap.parent_capability_id {
            self.by_parent
                .entry(parent.clone())
                .or_default()
                .insert(cap.id.clone());
        }
        self.by_target
            .entry(target_key(&cap.resource_uri))
            .or_default()
            .insert(cap.id.clone());
        self.caps.insert(cap.id.clone(), cap);
    }

    fn remove(&mut self, cap_id: &str) -> Option<Capability> {
        let cap = self.caps.remove(cap_id)?;
        if let Some(ids) = self.by_principal.get_mut(&cap.principal_id) {
            ids.remove(cap_id);
            if ids.is_empty() {
                self.by_principal.remove(&cap.principal_id);
            }
        }
        if let Some(parent) = &cap.parent_capability_id {
            if let Some(ids) = self.by_parent.get_mut(parent) {
                ids.remove(cap_id);
                if ids.is_empty() {
                    self.by_parent.remove(parent);
                }
            }
        }
        let key = target_key(&cap.resource_uri);
        if let Some(ids) = self.by_target.get_mut(&key) {
            ids.remove(cap_id);
            if ids.is_empty() {
                self.by_target.remove(&key);
            }
        }
        Some(cap)
    }
}

fn target_key(uri: &ResourceUri) -> (String, String, String) {
    (uri.scheme.clone(), uri.kind.clone(), uri.action.clone())
}

/// Persistent keyed capability storage.
///
/// All mutations serialize on one write lock, so indices can never tear:
/// a reader either sees a token in every index or in none.
#[derive(Debug, Default)]
pub struct CapabilityStore {
    inner: RwLock<StoreInner>,
    quotas: StoreQuotas,
}

impl CapabilityStore {
    /// Create a store with default quotas.
    pub fn new() -> Self {
        Self::with_quotas(StoreQuotas::default())
    }

    /// Create a store with explicit quotas.
    pub fn with_quotas(quotas: StoreQuotas) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            quotas,
        }
    }

    /// Insert or replace a capability by id, enforcing quotas first.
    pub async fn put(&self, cap: Capability) -> Result<()> {
        let mut inner = self.inner.write().await;

        if self.quotas.enforcement_enabled {
            if cap.delegation_depth < 0 {
                return Err(CapsError::QuotaExceeded {
                    kind: QuotaKind::NegativeDepth,
                    context: format!("delegation_depth {}", cap.delegation_depth),
                });
            }
            if cap.delegation_depth > self.quotas.max_delegation_depth {
                return Err(CapsError::QuotaExceeded {
                    kind: QuotaKind::DelegationDepthLimit,
                    context: format!(
                        "delegation_depth {} > limit {}",
                        cap.delegation_depth, self.quotas.max_delegation_depth
                    ),
                });
            }

            let replacing = inner.caps.contains_key(&cap.id);
            if !replacing && inner.caps.len() >= self.quotas.max_global_capabilities {
                return Err(CapsError::QuotaExceeded {
                    kind: QuotaKind::GlobalCapabilityLimit,
                    context: format!("limit {}", self.quotas.max_global_capabilities),
                });
            }
            let replacing_same_principal = inner
                .caps
                .get(&cap.id)
                .is_some_and(|old| old.principal_id == cap.principal_id);
            let held = inner
                .by_principal
                .get(&cap.principal_id)
                .map_or(0, |ids| ids.len());
            let held = if replacing_same_principal {
                held.saturating_sub(1)
            } else {
                held
            };
            if held >= self.quotas.max_capabilities_per_agent {
                return Err(CapsError::QuotaExceeded {
                    kind: QuotaKind::PerAgentCapabilityLimit,
                    context: format!(
                        "principal {} holds {held}, limit {}",
                        cap.principal_id, self.quotas.max_capabilities_per_agent
                    ),
                });
            }
        }

        tracing::debug!(cap_id = %cap.id, principal = %cap.principal_id, "capability stored");
        inner.insert(cap);
        Ok(())
    }

    /// Fetch a capability by id.
    ///
    /// An expired token is removed from all indices and reported as
    /// `CapabilityExpired`.
    pub async fn get(&self, cap_id: &str) -> Result<Capability> {
        let mut inner = self.inner.write().await;
        let cap = inner
            .caps
            .get(cap_id)
            .ok_or_else(|| CapsError::NotFound(cap_id.to_string()))?;

        if cap.is_expired(Utc::now()) {
            inner.remove(cap_id);
            return Err(CapsError::CapabilityExpired(cap_id.to_string()));
        }
        Ok(inner.caps[cap_id].clone())
    }

    /// All capabilities held by a principal.
    ///
    /// Expired tokens are filtered (and removed) unless `include_expired`.
    pub async fn list_for_principal(
        &self,
        principal: &AgentId,
        include_expired: bool,
    ) -> Vec<Capability> {
        let mut inner = self.inner.write().await;
        let Some(ids) = inner.by_principal.get(principal) else {
            return Vec::new();
        };
        let ids: Vec<String> = ids.iter().cloned().collect();
        let now = Utc::now();

        let mut out = Vec::new();
        for id in ids {
            let Some(cap) = inner.caps.get(&id) else { continue };
            if cap.is_expired(now) {
                if include_expired {
                    out.push(cap.clone());
                } else {
                    inner.remove(&id);
                }
            } else {
                out.push(cap.clone());
            }
        }
        out.sort_by(|a, b| a.granted_at.cmp(&b.granted_at));
        out
    }

    /// Unexpired capabilities of `principal` whose resource URI authorizes
    /// `resource`, oldest grant first.
    ///
    /// Structural filtering only; the caller verifies signatures and
    /// delegation chains on the candidates and takes the first that
    /// passes.
    pub async fn authorizing_candidates(
        &self,
        principal: &AgentId,
        resource: &ResourceUri,
    ) -> Vec<Capability> {
        self.list_for_principal(principal, false)
            .await
            .into_iter()
            .filter(|cap| cap.resource_uri.authorizes(resource))
            .collect()
    }

    /// Remove one capability. Fails if absent.
    pub async fn revoke(&self, cap_id: &str) -> Result<Capability> {
        let mut inner = self.inner.write().await;
        inner
            .remove(cap_id)
            .ok_or_else(|| CapsError::NotFound(cap_id.to_string()))
    }

    /// Remove every capability held by a principal; returns the count.
    pub async fn revoke_all(&self, principal: &AgentId) -> usize {
        let mut inner = self.inner.write().await;
        let Some(ids) = inner.by_principal.get(principal) else {
            return 0;
        };
        let ids: Vec<String> = ids.iter().cloned().collect();
        let mut count = 0;
        for id in ids {
            if inner.remove(&id).is_some() {
                count += 1;
            }
        }
        count
    }

    /// Revoke `cap_id` and every descendant reachable through the parent
    /// index. Returns the total number revoked.
    ///
    /// Fails with `NotFound` only when the root itself is missing;
    /// already-missing descendants are skipped.
    pub async fn cascade_revoke(&self, cap_id: &str) -> Result<usize> {
        let mut inner = self.inner.write().await;
        if !inner.caps.contains_key(cap_id) {
            return Err(CapsError::NotFound(cap_id.to_string()));
        }

        let mut queue = VecDeque::from([cap_id.to_string()]);
        let mut count = 0;
        while let Some(id) = queue.pop_front() {
            if let Some(children) = inner.by_parent.get(&id) {
                queue.extend(children.iter().cloned());
            }
            if inner.remove(&id).is_some() {
                count += 1;
            }
        }
        tracing::debug!(root = cap_id, count, "cascade revocation");
        Ok(count)
    }

    /// Store counters and the quotas in force.
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.read().await;
        StoreStats {
            total: inner.caps.len(),
            principals: inner.by_principal.len(),
            delegated: inner
                .caps
                .values()
                .filter(|c| c.parent_capability_id.is_some())
                .count(),
            quotas: self.quotas.clone(),
        }
    }

    /// The quotas this store was built with.
    pub fn quotas(&self) -> &StoreQuotas {
        &self.quotas
    }
}
