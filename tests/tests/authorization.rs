//! End-to-end authorization scenarios across the whole substrate

use arbor_audit::AuditKind;
use arbor_caps::{Constraints, ConstraintViolation};
use arbor_security::{AuthorizeOptions, Decision, DenyReason};
use arbor_tests::TestEnv;
use std::sync::Arc;

#[tokio::test]
async fn grant_and_authorize_roundtrip() {
    let env = TestEnv::new().await;
    let alice = env.agent().await;

    env.arbor
        .grant(
            alice.agent_id(),
            "arbor://fs/read/docs",
            Constraints::default(),
            3,
            None,
        )
        .await
        .unwrap();

    let decision = env
        .arbor
        .authorize(alice.agent_id(), "arbor://fs/read/docs", Default::default())
        .await
        .unwrap();
    assert!(decision.is_authorized());

    let decision = env
        .arbor
        .authorize(alice.agent_id(), "arbor://fs/write/docs", Default::default())
        .await
        .unwrap();
    assert_eq!(
        decision,
        Decision::Denied {
            reason: DenyReason::NoCapability
        }
    );
}

#[tokio::test]
async fn delegation_roundtrip_and_chain_tamper() {
    let env = TestEnv::new().await;
    let parent_holder = env.agent().await;
    let child_holder = env.agent().await;

    let parent = env
        .arbor
        .grant(
            parent_holder.agent_id(),
            "arbor://fs/read/**",
            Constraints::default(),
            3,
            None,
        )
        .await
        .unwrap();

    let child = env
        .arbor
        .delegate(
            &parent.id,
            &parent_holder.signing,
            child_holder.agent_id(),
            Constraints::default(),
            None,
        )
        .await
        .unwrap();

    let decision = env
        .arbor
        .authorize(
            child_holder.agent_id(),
            "arbor://fs/read/docs/deep/path",
            Default::default(),
        )
        .await
        .unwrap();
    assert!(decision.is_authorized());

    // Tamper with the single chain record's signature and re-insert
    let mut tampered = child.clone();
    let mut record = (*tampered.delegation_chain[0]).clone();
    record.signature[0] ^= 0xff;
    tampered.delegation_chain[0] = Arc::new(record);
    env.arbor.store().put(tampered).await.unwrap();

    let decision = env
        .arbor
        .authorize(
            child_holder.agent_id(),
            "arbor://fs/read/docs/deep/path",
            Default::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        decision,
        Decision::Denied {
            reason: DenyReason::Unauthorized
        }
    );
}

#[tokio::test]
async fn rate_limit_consumes_but_can_does_not() {
    let env = TestEnv::new().await;
    let alice = env.agent().await;

    env.arbor
        .grant(
            alice.agent_id(),
            "arbor://fs/read/docs",
            Constraints {
                rate_limit: Some(3),
                ..Default::default()
            },
            0,
            None,
        )
        .await
        .unwrap();

    for i in 0..3 {
        assert!(
            env.arbor
                .authorize(alice.agent_id(), "arbor://fs/read/docs", Default::default())
                .await
                .unwrap()
                .is_authorized(),
            "call {i} should pass"
        );
        // The boolean query stays true throughout and consumes nothing
        assert!(env
            .arbor
            .can(alice.agent_id(), "arbor://fs/read/docs")
            .await
            .unwrap());
    }

    let decision = env
        .arbor
        .authorize(alice.agent_id(), "arbor://fs/read/docs", Default::default())
        .await
        .unwrap();
    assert_eq!(
        decision,
        Decision::Denied {
            reason: DenyReason::ConstraintViolated(ConstraintViolation::RateLimited {
                limit: 3,
                remaining: 0,
            })
        }
    );
    assert!(env
        .arbor
        .can(alice.agent_id(), "arbor://fs/read/docs")
        .await
        .unwrap());
}

#[tokio::test]
async fn cascade_revoke_exact_subtrees() {
    let env = TestEnv::new().await;
    let alice = env.agent().await;
    let bob = env.agent().await;
    let carol = env.agent().await;

    let parent = env
        .arbor
        .grant(
            alice.agent_id(),
            "arbor://fs/read/**",
            Constraints::default(),
            3,
            None,
        )
        .await
        .unwrap();
    let child = env
        .arbor
        .delegate(
            &parent.id,
            &alice.signing,
            bob.agent_id(),
            Constraints::default(),
            None,
        )
        .await
        .unwrap();
    let grandchild = env
        .arbor
        .delegate(
            &child.id,
            &bob.signing,
            carol.agent_id(),
            Constraints::default(),
            None,
        )
        .await
        .unwrap();

    // Full-tree cascade removes all three
    assert_eq!(env.arbor.cascade_revoke(&parent.id).await.unwrap(), 3);
    for id in [&parent.id, &child.id, &grandchild.id] {
        assert!(env.arbor.store().get(id).await.is_err());
    }

    // Sibling tree: revoking the middle leaves the parent intact
    let parent2 = env
        .arbor
        .grant(
            alice.agent_id(),
            "arbor://fs/read/**",
            Constraints::default(),
            3,
            None,
        )
        .await
        .unwrap();
    let child2 = env
        .arbor
        .delegate(
            &parent2.id,
            &alice.signing,
            bob.agent_id(),
            Constraints::default(),
            None,
        )
        .await
        .unwrap();
    env.arbor
        .delegate(
            &child2.id,
            &bob.signing,
            carol.agent_id(),
            Constraints::default(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(env.arbor.cascade_revoke(&child2.id).await.unwrap(), 2);
    assert!(env.arbor.store().get(&parent2.id).await.is_ok());
}

#[tokio::test]
async fn narrowed_delegation_is_enforced_on_the_child() {
    let env = TestEnv::new().await;
    let alice = env.agent().await;
    let bob = env.agent().await;

    let parent = env
        .arbor
        .grant(
            alice.agent_id(),
            "arbor://fs/read/**",
            Constraints::default(),
            2,
            None,
        )
        .await
        .unwrap();
    env.arbor
        .delegate(
            &parent.id,
            &alice.signing,
            bob.agent_id(),
            Constraints {
                exclude: vec!["secrets/**".to_string()],
                max_depth: Some(3),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    assert!(env
        .arbor
        .authorize(bob.agent_id(), "arbor://fs/read/reports/q3", Default::default())
        .await
        .unwrap()
        .is_authorized());

    let decision = env
        .arbor
        .authorize(bob.agent_id(), "arbor://fs/read/secrets/keys", Default::default())
        .await
        .unwrap();
    assert!(matches!(
        decision,
        Decision::Denied {
            reason: DenyReason::ConstraintViolated(ConstraintViolation::ExcludedPattern { .. })
        }
    ));
}

#[tokio::test]
async fn audit_events_correlate_by_trace() {
    let env = TestEnv::new().await;
    let alice = env.agent().await;

    env.arbor
        .grant(
            alice.agent_id(),
            "arbor://fs/read/docs",
            Constraints::default(),
            0,
            None,
        )
        .await
        .unwrap();

    let request = arbor_identity::SignedRequest::sign(
        alice.agent_id().clone(),
        b"read docs".to_vec(),
        &alice.signing,
    );
    env.arbor
        .authorize(
            alice.agent_id(),
            "arbor://fs/read/docs",
            AuthorizeOptions {
                signed_request: Some(request),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let granted = env.arbor.audit().by_kind(AuditKind::AuthorizationGranted).await;
    assert_eq!(granted.len(), 1);
    let trace = granted[0].trace_id.clone().expect("grant carries a trace");

    // The verification event of the same call shares the trace id
    let correlated = env.arbor.audit().by_trace(&trace).await;
    assert_eq!(correlated.len(), 2);
    assert_eq!(correlated[0].kind, AuditKind::IdentityVerificationSucceeded);
    assert_eq!(correlated[1].kind, AuditKind::AuthorizationGranted);
}

#[tokio::test]
async fn expired_capability_stops_authorizing() {
    let env = TestEnv::new().await;
    let alice = env.agent().await;

    env.arbor
        .grant(
            alice.agent_id(),
            "arbor://fs/read/docs",
            Constraints::default(),
            0,
            Some(chrono::Utc::now() - chrono::Duration::seconds(1)),
        )
        .await
        .unwrap();

    let decision = env
        .arbor
        .authorize(alice.agent_id(), "arbor://fs/read/docs", Default::default())
        .await
        .unwrap();
    assert_eq!(
        decision,
        Decision::Denied {
            reason: DenyReason::NoCapability
        }
    );
}
