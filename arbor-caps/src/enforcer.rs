//! Constraint enforcement
//!
//! Evaluates a capability's constraints against a requested resource in a
//! fixed order: `patterns`, `exclude`, `max_depth`, `time_window`,
//! `rate_limit`, `requires_approval`. Globs and depth are measured on the
//! capability-root-relative path, after traversal canonicalization for
//! filesystem resources.
//!
//! Violations are ordinary values, not errors; only path traversal and
//! internal failures surface as `Err`.

use crate::capability::Capability;
use crate::error::Result;
use crate::paths::resolve_relative;
use crate::ratelimit::{RateDecision, RateLimiter, RateLimiterConfig};
use crate::uri::ResourceUri;
use chrono::{Timelike, Utc};
use globset::Glob;
use serde::{Deserialize, Serialize};

/// A constraint that refused the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintViolation {
    /// No allow-pattern matched the path
    PatternMismatch {
        /// Root-relative path that was checked
        path: String,
    },
    /// An exclude-pattern matched the path
    ExcludedPattern {
        /// Root-relative path that was checked
        path: String,
        /// The pattern that fired
        pattern: String,
    },
    /// Path depth exceeds the bound
    MaxDepthExceeded {
        /// Observed depth
        depth: usize,
        /// Configured bound
        max: u32,
    },
    /// Decision hour falls outside the window
    OutsideTimeWindow {
        /// UTC hour of the decision
        hour: u8,
        /// Window start (inclusive)
        start_hour: u8,
        /// Window end (exclusive)
        end_hour: u8,
    },
    /// The token bucket is empty for this period
    RateLimited {
        /// The bucket's capacity
        limit: u32,
        /// Tokens remaining (always 0 here)
        remaining: u32,
    },
}

impl ConstraintViolation {
    /// Short tag for audit metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PatternMismatch { .. } => "pattern_mismatch",
            Self::ExcludedPattern { .. } => "excluded_pattern",
            Self::MaxDepthExceeded { .. } => "max_depth_exceeded",
            Self::OutsideTimeWindow { .. } => "time_window",
            Self::RateLimited { .. } => "rate_limit",
        }
    }
}

/// Outcome of constraint evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enforcement {
    /// Every constraint passed
    Ok,
    /// A constraint refused the request
    Violated(ConstraintViolation),
    /// Constraints passed but the capability demands approval
    NeedsApproval,
}

/// Evaluates capability constraints, owning the rate limiter.
#[derive(Debug)]
pub struct ConstraintEnforcer {
    limiter: RateLimiter,
    enabled: bool,
}

impl ConstraintEnforcer {
    /// Create an enforcer; `enabled = false` bypasses every constraint.
    pub fn new(limiter_config: RateLimiterConfig, enabled: bool) -> Self {
        Self {
            limiter: RateLimiter::new(limiter_config),
            enabled,
        }
    }

    /// The underlying rate limiter, for sweeps and introspection.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Evaluate `cap`'s constraints against `resource`.
    ///
    /// `consume` controls whether the rate limiter takes a token; boolean
    /// queries pass `false` and never spend budget. Path traversal fails
    /// with `Err` before any constraint is considered.
    pub async fn enforce(
        &self,
        cap: &Capability,
        resource: &ResourceUri,
        consume: bool,
    ) -> Result<Enforcement> {
        let relative = relative_path(cap, resource)?;

        if !self.enabled {
            return Ok(Enforcement::Ok);
        }

        let path = relative.join("/");
        let constraints = &cap.constraints;

        if !constraints.patterns.is_empty() {
            let matched = constraints
                .patterns
                .iter()
                .any(|pattern| glob_matches(pattern, &path));
            if !matched {
                return Ok(Enforcement::Violated(ConstraintViolation::PatternMismatch {
                    path,
                }));
            }
        }

        for pattern in &constraints.exclude {
            if glob_matches(pattern, &path) {
                return Ok(Enforcement::Violated(ConstraintViolation::ExcludedPattern {
                    path,
                    pattern: pattern.clone(),
                }));
            }
        }

        if let Some(max) = constraints.max_depth {
            if relative.len() > max as usize {
                return Ok(Enforcement::Violated(
                    ConstraintViolation::MaxDepthExceeded {
                        depth: relative.len(),
                        max,
                    },
                ));
            }
        }

        if let Some(window) = constraints.time_window {
            let hour = Utc::now().hour() as u8;
            if !window.contains(hour) {
                return Ok(Enforcement::Violated(
                    ConstraintViolation::OutsideTimeWindow {
                        hour,
                        start_hour: window.start_hour,
                        end_hour: window.end_hour,
                    },
                ));
            }
        }

        if let Some(limit) = constraints.rate_limit {
            if consume {
                let decision = self
                    .limiter
                    .consume(&cap.principal_id, &cap.resource_uri.to_string(), limit)
                    .await;
                if let RateDecision::Limited { limit } = decision {
                    return Ok(Enforcement::Violated(ConstraintViolation::RateLimited {
                        limit,
                        remaining: 0,
                    }));
                }
            }
        }

        if constraints.requires_approval {
            return Ok(Enforcement::NeedsApproval);
        }

        Ok(Enforcement::Ok)
    }
}

/// Root-relative segments of the requested path, canonicalized for
/// filesystem resources.
fn relative_path(cap: &Capability, resource: &ResourceUri) -> Result<Vec<String>> {
    let root = cap.resource_uri.root_segments();
    if resource.is_fs() {
        resolve_relative(root, &resource.segments)
    } else {
        // Non-filesystem kinds have no dot segments; the URI-level prefix
        // match already guaranteed the root.
        Ok(resource.segments[root.len().min(resource.segments.len())..].to_vec())
    }
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(path),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "unparseable constraint glob, treated as non-matching");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Constraints, TimeWindow};
    use arbor_crypto::SIGNATURE_LEN;
    use arbor_identity::AgentId;

    fn cap(uri: &str, constraints: Constraints) -> Capability {
        Capability {
            id: Capability::new_id(),
            resource_uri: ResourceUri::parse(uri).unwrap(),
            principal_id: AgentId::derive(&[1u8; 32]),
            issuer_id: AgentId::derive(&[0u8; 32]),
            issuer_signature: [0u8; SIGNATURE_LEN],
            constraints,
            delegation_depth: 0,
            parent_capability_id: None,
            delegation_chain: vec![],
            granted_at: Utc::now(),
            expires_at: None,
        }
    }

    fn enforcer() -> ConstraintEnforcer {
        ConstraintEnforcer::new(RateLimiterConfig::default(), true)
    }

    fn uri(s: &str) -> ResourceUri {
        ResourceUri::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_empty_constraints_pass() {
        let e = enforcer();
        let c = cap("arbor://fs/read/docs", Constraints::default());
        assert_eq!(
            e.enforce(&c, &uri("arbor://fs/read/docs/a"), true)
                .await
                .unwrap(),
            Enforcement::Ok
        );
    }

    #[tokio::test]
    async fn test_patterns_and_exclude() {
        let e = enforcer();
        let c = cap(
            "arbor://fs/read/docs",
            Constraints {
                patterns: vec!["reports/**".to_string()],
                exclude: vec!["reports/private/**".to_string()],
                ..Default::default()
            },
        );

        assert_eq!(
            e.enforce(&c, &uri("arbor://fs/read/docs/reports/q3/summary"), true)
                .await
                .unwrap(),
            Enforcement::Ok
        );

        let miss = e
            .enforce(&c, &uri("arbor://fs/read/docs/drafts/x"), true)
            .await
            .unwrap();
        assert!(matches!(
            miss,
            Enforcement::Violated(ConstraintViolation::PatternMismatch { .. })
        ));

        let excluded = e
            .enforce(&c, &uri("arbor://fs/read/docs/reports/private/keys"), true)
            .await
            .unwrap();
        assert!(matches!(
            excluded,
            Enforcement::Violated(ConstraintViolation::ExcludedPattern { .. })
        ));
    }

    #[tokio::test]
    async fn test_max_depth_relative_to_root() {
        let e = enforcer();
        let c = cap(
            "arbor://fs/read/docs",
            Constraints {
                max_depth: Some(2),
                ..Default::default()
            },
        );

        assert_eq!(
            e.enforce(&c, &uri("arbor://fs/read/docs/a/b"), true)
                .await
                .unwrap(),
            Enforcement::Ok
        );
        assert!(matches!(
            e.enforce(&c, &uri("arbor://fs/read/docs/a/b/c"), true)
                .await
                .unwrap(),
            Enforcement::Violated(ConstraintViolation::MaxDepthExceeded { depth: 3, max: 2 })
        ));
    }

    #[tokio::test]
    async fn test_traversal_fails_before_constraints() {
        let e = enforcer();
        let c = cap(
            "arbor://fs/read/docs",
            Constraints {
                patterns: vec!["**".to_string()],
                ..Default::default()
            },
        );

        assert!(matches!(
            e.enforce(&c, &uri("arbor://fs/read/docs/../../etc/shadow"), true)
                .await,
            Err(crate::error::CapsError::PathTraversal(_))
        ));
    }

    #[tokio::test]
    async fn test_time_window_violation_reports_hour() {
        let e = enforcer();
        let hour = Utc::now().hour() as u8;
        // A window that excludes the current hour: the single next hour
        let start = (hour + 1) % 24;
        let end = (hour + 2) % 24;
        let c = cap(
            "arbor://fs/read/docs",
            Constraints {
                time_window: Some(TimeWindow {
                    start_hour: start,
                    end_hour: end,
                }),
                ..Default::default()
            },
        );

        let outcome = e
            .enforce(&c, &uri("arbor://fs/read/docs"), true)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Enforcement::Violated(ConstraintViolation::OutsideTimeWindow { .. })
        ));

        // And a window containing the current hour passes
        let open = cap(
            "arbor://fs/read/docs",
            Constraints {
                time_window: Some(TimeWindow {
                    start_hour: hour,
                    end_hour: (hour + 1) % 24,
                }),
                ..Default::default()
            },
        );
        assert_eq!(
            e.enforce(&open, &uri("arbor://fs/read/docs"), true)
                .await
                .unwrap(),
            Enforcement::Ok
        );
    }

    #[tokio::test]
    async fn test_rate_limit_consumes_only_when_asked() {
        let e = enforcer();
        let c = cap(
            "arbor://fs/read/docs",
            Constraints {
                rate_limit: Some(2),
                ..Default::default()
            },
        );
        let r = uri("arbor://fs/read/docs/a");

        // Non-consuming checks never spend budget
        for _ in 0..5 {
            assert_eq!(e.enforce(&c, &r, false).await.unwrap(), Enforcement::Ok);
        }

        assert_eq!(e.enforce(&c, &r, true).await.unwrap(), Enforcement::Ok);
        assert_eq!(e.enforce(&c, &r, true).await.unwrap(), Enforcement::Ok);
        assert!(matches!(
            e.enforce(&c, &r, true).await.unwrap(),
            Enforcement::Violated(ConstraintViolation::RateLimited { limit: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_requires_approval_after_other_constraints() {
        let e = enforcer();
        let c = cap(
            "arbor://fs/read/docs",
            Constraints {
                requires_approval: true,
                max_depth: Some(1),
                ..Default::default()
            },
        );

        assert_eq!(
            e.enforce(&c, &uri("arbor://fs/read/docs/a"), true)
                .await
                .unwrap(),
            Enforcement::NeedsApproval
        );
        // Depth violation wins over the approval escalation
        assert!(matches!(
            e.enforce(&c, &uri("arbor://fs/read/docs/a/b"), true)
                .await
                .unwrap(),
            Enforcement::Violated(ConstraintViolation::MaxDepthExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_disabled_enforcer_bypasses_everything() {
        let e = ConstraintEnforcer::new(RateLimiterConfig::default(), false);
        let c = cap(
            "arbor://fs/read/docs",
            Constraints {
                patterns: vec!["nothing/**".to_string()],
                rate_limit: Some(0),
                requires_approval: true,
                ..Default::default()
            },
        );
        assert_eq!(
            e.enforce(&c, &uri("arbor://fs/read/docs/x"), true)
                .await
                .unwrap(),
            Enforcement::Ok
        );
        // Traversal still fails even with enforcement off
        assert!(e
            .enforce(&c, &uri("arbor://fs/read/docs/../../x"), true)
            .await
            .is_err());
    }
}
