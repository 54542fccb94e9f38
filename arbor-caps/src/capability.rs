//! Capability and delegation data model
//!
//! The signing encoding is deterministic and versioned by construction:
//! a fixed field order joined with `|`, constraints rendered as a
//! sorted-key map. Mutable metadata and the delegation chain are
//! deliberately outside the signed bytes; the chain carries its own
//! signatures.

use crate::uri::ResourceUri;
use arbor_crypto::SIGNATURE_LEN;
use arbor_identity::AgentId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// UTC hour gate, `start_hour` inclusive, `end_hour` exclusive.
///
/// Wrap-around windows (`start > end`) cover the hours outside the inner
/// range: `{start: 22, end: 6}` admits 22:00–06:00. `start == end` is the
/// degenerate full-day window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// First admitted UTC hour (0–23)
    pub start_hour: u8,
    /// First refused UTC hour (0–23)
    pub end_hour: u8,
}

impl TimeWindow {
    /// Whether the given UTC hour falls inside the window.
    pub fn contains(&self, hour: u8) -> bool {
        if self.start_hour == self.end_hour {
            true
        } else if self.start_hour < self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    /// Whether every hour this window admits is also admitted by `parent`.
    pub fn narrows(&self, parent: &TimeWindow) -> bool {
        (0u8..24).all(|h| !self.contains(h) || parent.contains(h))
    }
}

/// Recognized capability constraints.
///
/// All fields optional; an empty constraint set admits everything the
/// resource URI itself admits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Resource path must match at least one glob
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,

    /// Resource path must match none of these globs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    /// Maximum path depth relative to the capability root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,

    /// Authorizations per refill period per (principal, resource)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,

    /// UTC hour gate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,

    /// Consult the approval service before granting
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_approval: bool,

    /// Application-visible size bound, passed through unenforced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

impl Constraints {
    /// Canonical string form used inside signing encodings.
    ///
    /// Sorted keys, list values sorted and `;`-joined, scalars in their
    /// canonical decimal or boolean form. Unset fields are omitted, so
    /// adding a recognized key later never perturbs old signatures.
    pub fn canonical(&self) -> String {
        let mut entries: Vec<String> = Vec::new();

        if !self.exclude.is_empty() {
            let sorted: BTreeSet<&String> = self.exclude.iter().collect();
            entries.push(format!(
                "exclude={}",
                sorted.into_iter().cloned().collect::<Vec<_>>().join(";")
            ));
        }
        if let Some(depth) = self.max_depth {
            entries.push(format!("max_depth={depth}"));
        }
        if let Some(size) = self.max_size {
            entries.push(format!("max_size={size}"));
        }
        if !self.patterns.is_empty() {
            let sorted: BTreeSet<&String> = self.patterns.iter().collect();
            entries.push(format!(
                "patterns={}",
                sorted.into_iter().cloned().collect::<Vec<_>>().join(";")
            ));
        }
        if let Some(limit) = self.rate_limit {
            entries.push(format!("rate_limit={limit}"));
        }
        if self.requires_approval {
            entries.push("requires_approval=true".to_string());
        }
        if let Some(window) = self.time_window {
            entries.push(format!(
                "time_window={}-{}",
                window.start_hour, window.end_hour
            ));
        }

        entries.sort();
        entries.join(",")
    }

    /// Whether these constraints only narrow `parent`'s.
    ///
    /// Pattern and exclude sets may only grow, numeric bounds may only
    /// decrease, time windows may only shrink, and a parent's approval
    /// requirement can never be dropped.
    pub fn narrows(&self, parent: &Constraints) -> bool {
        let child_patterns: BTreeSet<&String> = self.patterns.iter().collect();
        let parent_patterns: BTreeSet<&String> = parent.patterns.iter().collect();
        if !parent_patterns.is_subset(&child_patterns) {
            return false;
        }

        let child_exclude: BTreeSet<&String> = self.exclude.iter().collect();
        let parent_exclude: BTreeSet<&String> = parent.exclude.iter().collect();
        if !parent_exclude.is_subset(&child_exclude) {
            return false;
        }

        if let Some(parent_depth) = parent.max_depth {
            match self.max_depth {
                Some(child_depth) if child_depth <= parent_depth => {}
                _ => return false,
            }
        }

        if let Some(parent_limit) = parent.rate_limit {
            match self.rate_limit {
                Some(child_limit) if child_limit <= parent_limit => {}
                _ => return false,
            }
        }

        if let Some(parent_size) = parent.max_size {
            match self.max_size {
                Some(child_size) if child_size <= parent_size => {}
                _ => return false,
            }
        }

        if let Some(parent_window) = parent.time_window {
            match self.time_window {
                Some(child_window) if child_window.narrows(&parent_window) => {}
                _ => return false,
            }
        }

        if parent.requires_approval && !self.requires_approval {
            return false;
        }

        true
    }
}

/// One signed step in a delegation lineage.
///
/// Records are shared by `Arc` across every descendant of a delegated
/// capability; the record outlives any single child. The signature is
/// the delegator's, over [`DelegationRecord::signing_bytes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRecord {
    /// Principal of the parent capability who performed the delegation
    pub delegator_id: AgentId,

    /// Principal the child capability was minted for
    pub delegatee_id: AgentId,

    /// Parent capability id
    pub parent_capability_id: String,

    /// Child capability id
    pub capability_id: String,

    /// Constraint snapshot the child was narrowed to
    pub constraints: Constraints,

    /// When the delegation happened
    pub delegated_at: DateTime<Utc>,

    /// Delegator's Ed25519 signature
    #[serde(with = "hex::serde")]
    pub signature: [u8; SIGNATURE_LEN],
}

impl DelegationRecord {
    /// The bytes the delegator signed:
    /// `parent_cap_id | new_cap_id | delegatee_principal_id | constraints`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        signing_bytes_for(
            &self.parent_capability_id,
            &self.capability_id,
            &self.delegatee_id,
            &self.constraints,
        )
    }
}

/// Build delegation-record signing bytes before the record exists.
pub(crate) fn signing_bytes_for(
    parent_capability_id: &str,
    capability_id: &str,
    delegatee_id: &AgentId,
    constraints: &Constraints,
) -> Vec<u8> {
    format!(
        "{parent_capability_id}|{capability_id}|{delegatee_id}|{}",
        constraints.canonical()
    )
    .into_bytes()
}

/// A signed token authorizing `principal_id` on `resource_uri`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Opaque unique id, stable across the token's lifetime
    pub id: String,

    /// Resource this token authorizes, with prefix semantics
    pub resource_uri: ResourceUri,

    /// Agent the token is bound to
    pub principal_id: AgentId,

    /// Agent whose signature endorses the token (the system authority)
    pub issuer_id: AgentId,

    /// Detached Ed25519 signature over [`Capability::canonical_bytes`]
    #[serde(with = "hex::serde")]
    pub issuer_signature: [u8; SIGNATURE_LEN],

    /// Enforcement options
    #[serde(default)]
    pub constraints: Constraints,

    /// Remaining delegation budget; never increases across delegations
    pub delegation_depth: i64,

    /// Predecessor in the delegation tree, `None` at a root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_capability_id: Option<String>,

    /// Delegation lineage, root-first; empty for directly granted tokens
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delegation_chain: Vec<Arc<DelegationRecord>>,

    /// Issuance timestamp
    pub granted_at: DateTime<Utc>,

    /// Expiry, `None` for non-expiring tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Capability {
    /// Mint a fresh capability id.
    pub fn new_id() -> String {
        format!("cap_{}", Uuid::new_v4().simple())
    }

    /// The stable on-wire encoding the issuer signs:
    /// `id | resource_uri | principal_id | constraints | delegation_depth
    /// | expires_at | issuer_id`.
    ///
    /// The delegation chain and `granted_at` are excluded: the chain is
    /// covered by its own per-record signatures.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let expires = match self.expires_at {
            Some(at) => at.to_rfc3339_opts(SecondsFormat::Micros, true),
            None => "never".to_string(),
        };
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.resource_uri,
            self.principal_id,
            self.constraints.canonical(),
            self.delegation_depth,
            expires,
            self.issuer_id,
        )
        .into_bytes()
    }

    /// Whether the expiry timestamp has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Depth of this capability below its delegation root.
    pub fn chain_len(&self) -> usize {
        self.delegation_chain.len()
    }
}
