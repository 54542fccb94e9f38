//! End-to-end channel and session scenarios

use arbor_channels::{ChannelError, LeaveOutcome, RatchetSession};
use arbor_crypto::EncryptionKeyPair;
use arbor_security::Decision;
use arbor_tests::TestEnv;

#[tokio::test]
async fn channel_rotation_on_leave_locks_out_departed_member() {
    let env = TestEnv::new().await;
    let creator = env.agent().await;
    let member = env.agent().await;

    let mut creator_keychain = env.keychain(&creator);
    let mut member_keychain = env.keychain(&member);

    let channel = env
        .channels
        .create("watchers", &mut creator_keychain)
        .await
        .unwrap();
    let invitation = env
        .channels
        .invite(&channel.id, member.agent_id(), &creator_keychain)
        .await
        .unwrap();
    env.channels
        .accept_invitation(&invitation, &mut member_keychain)
        .await
        .unwrap();
    assert_eq!(env.channels.channel(&channel.id).await.unwrap().key_version, 1);

    // Member leaves; rotate-on-leave bumps the version
    let outcome = env
        .channels
        .leave(&channel.id, &mut member_keychain)
        .await
        .unwrap();
    let LeaveOutcome::Left {
        rotation: Some(rotation),
        ..
    } = outcome
    else {
        panic!("expected rotation on leave");
    };
    assert_eq!(rotation.key_version, 2);

    // Creator picks up the rotated key and publishes
    let reinvite = rotation
        .reinvitations
        .into_iter()
        .find(|i| i.invitee_id == *creator.agent_id())
        .expect("creator re-invitation");
    env.channels
        .accept_invitation(&reinvite, &mut creator_keychain)
        .await
        .unwrap();
    let envelope = env
        .channels
        .send(&channel.id, &creator_keychain, "status", b"all clear")
        .await
        .unwrap();
    assert_eq!(envelope.key_version, 2);

    // The departed member can no longer receive
    assert!(matches!(
        env.channels.receive(&envelope, &member_keychain).await,
        Err(ChannelError::NotAMember { .. })
    ));

    // Last member leaving destroys the channel
    let outcome = env
        .channels
        .leave(&channel.id, &mut creator_keychain)
        .await
        .unwrap();
    assert!(matches!(outcome, LeaveOutcome::Destroyed));
    assert!(matches!(
        env.channels.channel(&channel.id).await,
        Err(ChannelError::UnknownChannel(_))
    ));
}

#[tokio::test]
async fn channel_messages_flow_between_members() {
    let env = TestEnv::new().await;
    let creator = env.agent().await;
    let member = env.agent().await;

    let mut creator_keychain = env.keychain(&creator);
    let mut member_keychain = env.keychain(&member);

    let channel = env
        .channels
        .create("deliberation", &mut creator_keychain)
        .await
        .unwrap();
    let invitation = env
        .channels
        .invite(&channel.id, member.agent_id(), &creator_keychain)
        .await
        .unwrap();
    env.channels
        .accept_invitation(&invitation, &mut member_keychain)
        .await
        .unwrap();

    let envelope = env
        .channels
        .send(&channel.id, &member_keychain, "proposal", b"rotate weekly")
        .await
        .unwrap();
    let plaintext = env
        .channels
        .receive(&envelope, &creator_keychain)
        .await
        .unwrap();
    assert_eq!(plaintext, b"rotate weekly");
}

#[test]
fn ratchet_out_of_order_and_skip_bound() {
    // S6: three messages, decrypted 3-1-2
    let shared = [42u8; 32];
    let bob_keypair = EncryptionKeyPair::generate();
    let mut alice = RatchetSession::init_sender(&shared, &bob_keypair.public, 64);
    let mut bob = RatchetSession::init_receiver(&shared, bob_keypair, 64);

    let m1 = alice.encrypt(b"m1", b"").unwrap();
    let m2 = alice.encrypt(b"m2", b"").unwrap();
    let m3 = alice.encrypt(b"m3", b"").unwrap();

    assert_eq!(bob.decrypt(&m3, b"").unwrap(), b"m3");
    assert_eq!(bob.skipped_len(), 2);
    assert_eq!(bob.decrypt(&m1, b"").unwrap(), b"m1");
    assert_eq!(bob.decrypt(&m2, b"").unwrap(), b"m2");

    // With max_skip = 3, jumping straight to the fifth message refuses
    let bob_keypair = EncryptionKeyPair::generate();
    let mut alice = RatchetSession::init_sender(&shared, &bob_keypair.public, 3);
    let mut bob = RatchetSession::init_receiver(&shared, bob_keypair, 3);
    let messages: Vec<_> = (0..5)
        .map(|i| alice.encrypt(format!("m{i}").as_bytes(), b"").unwrap())
        .collect();
    assert!(matches!(
        bob.decrypt(&messages[4], b""),
        Err(ChannelError::MaxSkipExceeded { max_skip: 3 })
    ));
}

#[tokio::test]
async fn suspended_member_is_skipped_at_rotation() {
    let env = TestEnv::new().await;
    let creator = env.agent().await;
    let member = env.agent().await;

    let mut creator_keychain = env.keychain(&creator);
    let mut member_keychain = env.keychain(&member);

    let channel = env
        .channels
        .create("ops", &mut creator_keychain)
        .await
        .unwrap();
    let invitation = env
        .channels
        .invite(&channel.id, member.agent_id(), &creator_keychain)
        .await
        .unwrap();
    env.channels
        .accept_invitation(&invitation, &mut member_keychain)
        .await
        .unwrap();

    env.arbor
        .suspend_identity(member.agent_id(), None)
        .await
        .unwrap();

    let rotation = env
        .channels
        .rotate_key(&channel.id, creator.agent_id())
        .await
        .unwrap();
    // Only the creator gets a sealed re-invitation; the suspended member
    // has no resolvable encryption key
    assert_eq!(rotation.pending_members(), vec![creator.agent_id().clone()]);
}

#[tokio::test]
async fn channel_and_authorization_share_the_audit_log() {
    let env = TestEnv::new().await;
    let creator = env.agent().await;
    let mut creator_keychain = env.keychain(&creator);

    let channel = env
        .channels
        .create("everything", &mut creator_keychain)
        .await
        .unwrap();
    env.arbor
        .grant(
            creator.agent_id(),
            "arbor://signals/read/**",
            arbor_caps::Constraints::default(),
            0,
            None,
        )
        .await
        .unwrap();
    let decision = env
        .arbor
        .authorize(
            creator.agent_id(),
            "arbor://signals/read/channels",
            Default::default(),
        )
        .await
        .unwrap();
    assert!(matches!(decision, Decision::Authorized { .. }));

    // One log carries identity, channel, capability, and authorization
    // events for the same agent
    let for_agent = env.arbor.audit().by_agent(creator.agent_id().as_str()).await;
    let kinds: Vec<_> = for_agent.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&arbor_audit::AuditKind::IdentityRegistered));
    assert!(kinds.contains(&arbor_audit::AuditKind::ChannelCreated));
    assert!(kinds.contains(&arbor_audit::AuditKind::CapabilityGranted));
    assert!(kinds.contains(&arbor_audit::AuditKind::AuthorizationGranted));

    let record = env.channels.channel(&channel.id).await.unwrap();
    assert_eq!(record.members.len(), 1);
}
