//! Security configuration
//!
//! One immutable struct passed to subsystems at construction. There are
//! no dynamic toggles: changing configuration means rebuilding the
//! affected component and migrating state explicitly.

use arbor_caps::{RateLimiterConfig, StoreQuotas};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All recognized configuration options; omitted fields take defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Store admits anything when false
    pub quota_enforcement_enabled: bool,

    /// Per-principal capability quota
    pub max_capabilities_per_agent: usize,

    /// Global capability quota
    pub max_global_capabilities: usize,

    /// Maximum admissible delegation depth
    pub max_delegation_depth: i64,

    /// When false, unsigned capabilities authorize
    pub capability_signing_required: bool,

    /// Verify delegation chains in the authorization path
    pub delegation_chain_verification_enabled: bool,

    /// Evaluate capability constraints in the authorization path
    pub constraint_enforcement_enabled: bool,

    /// Allow `requires_approval` capabilities to escalate
    pub consensus_escalation_enabled: bool,

    /// Rate limiter refill period
    pub rate_limit_refill_period_seconds: u64,

    /// Rate limiter stale-bucket TTL
    pub bucket_ttl_seconds: u64,

    /// Rotate channel keys when a member leaves
    pub channel_rotate_on_leave: bool,

    /// Timer-driven channel rotation interval, disabled when `None`
    pub channel_auto_rotate_interval_ms: Option<u64>,

    /// Inactivity threshold for pairwise sessions
    pub stale_session_threshold_ms: u64,

    /// Signed-request replay window
    pub replay_window_seconds: i64,

    /// Skipped-key bound for double-ratchet sessions
    pub max_skip: u32,

    /// Config-driven role bundles, merged over the builtins
    pub roles: BTreeMap<String, Vec<String>>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            quota_enforcement_enabled: true,
            max_capabilities_per_agent: 100,
            max_global_capabilities: 10_000,
            max_delegation_depth: 5,
            capability_signing_required: true,
            delegation_chain_verification_enabled: true,
            constraint_enforcement_enabled: true,
            consensus_escalation_enabled: false,
            rate_limit_refill_period_seconds: 60,
            bucket_ttl_seconds: 3600,
            channel_rotate_on_leave: true,
            channel_auto_rotate_interval_ms: None,
            stale_session_threshold_ms: 3_600_000,
            replay_window_seconds: 300,
            max_skip: 64,
            roles: BTreeMap::new(),
        }
    }
}

impl SecurityConfig {
    /// Store quotas derived from this configuration.
    pub fn store_quotas(&self) -> StoreQuotas {
        StoreQuotas {
            max_capabilities_per_agent: self.max_capabilities_per_agent,
            max_global_capabilities: self.max_global_capabilities,
            max_delegation_depth: self.max_delegation_depth,
            enforcement_enabled: self.quota_enforcement_enabled,
        }
    }

    /// Rate limiter tuning derived from this configuration.
    pub fn limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            refill_period_seconds: self.rate_limit_refill_period_seconds,
            bucket_ttl_seconds: self.bucket_ttl_seconds,
        }
    }
}
