//! Group channels
//!
//! A channel is a named member set sharing one 32-byte symmetric key,
//! versioned per rotation. The key itself only ever exists inside member
//! keychains and sealed invitations; the channel record carries the
//! version counter and membership. Rotation happens on demand (creator),
//! on membership change (leave with rotate-on-leave, revoke always), and
//! on a timer.

use crate::error::{ChannelError, Result};
use crate::keychain::Keychain;
use arbor_audit::{AuditEvent, AuditKind, AuditLog};
use arbor_crypto::{aead_decrypt, aead_encrypt, AeadCiphertext, SealedEnvelope, SYMMETRIC_KEY_LEN};
use arbor_identity::{AgentId, IdentityRegistry};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use zeroize::Zeroize;

/// Channel subsystem tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelManagerConfig {
    /// Rotate the channel key whenever a member leaves
    pub rotate_on_leave: bool,
}

impl Default for ChannelManagerConfig {
    fn default() -> Self {
        Self {
            rotate_on_leave: true,
        }
    }
}

/// The public channel record. Never contains key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Opaque channel id
    pub id: String,

    /// Human-facing name
    pub name: String,

    /// Current creator (rotations and revocations gate on this)
    pub creator_id: AgentId,

    /// Member set
    pub members: BTreeSet<AgentId>,

    /// Strictly monotonic key version
    pub key_version: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Free-form application metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Channel {
    fn require_member(&self, agent_id: &AgentId) -> Result<()> {
        if self.members.contains(agent_id) {
            Ok(())
        } else {
            Err(ChannelError::NotAMember {
                agent_id: agent_id.clone(),
                channel_id: self.id.clone(),
            })
        }
    }
}

/// A sealed invitation carrying the channel key to one invitee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Channel being joined
    pub channel_id: String,

    /// Recipient
    pub invitee_id: AgentId,

    /// Member who issued the invitation
    pub inviter_id: AgentId,

    /// Key version the sealed key belongs to
    pub key_version: u64,

    /// The channel key, sealed to the invitee's encryption key
    pub sealed_key: SealedEnvelope,

    /// Issue timestamp
    pub invited_at: DateTime<Utc>,
}

/// An encrypted channel message.
///
/// A subscriber whose local key version differs MUST NOT attempt
/// decryption; [`ChannelManager::receive`] enforces exactly that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEnvelope {
    /// Channel the message belongs to
    pub channel_id: String,

    /// Key version the payload was sealed under
    pub key_version: u64,

    /// Application message type tag
    pub message_type: String,

    /// Sending member
    pub sender_id: AgentId,

    /// Sealed payload
    pub sealed: AeadCiphertext,

    /// Publish timestamp
    pub sent_at: DateTime<Utc>,
}

/// Result of a key rotation.
#[derive(Debug)]
pub struct RotationOutcome {
    /// The channel's new key version
    pub key_version: u64,

    /// Sealed re-invitations, one per member that must pick up the new
    /// key (members whose identities no longer resolve are skipped)
    pub reinvitations: Vec<Invitation>,
}

impl RotationOutcome {
    /// Members covered by the re-invitations.
    pub fn pending_members(&self) -> Vec<AgentId> {
        self.reinvitations
            .iter()
            .map(|i| i.invitee_id.clone())
            .collect()
    }
}

/// Result of a member leaving.
#[derive(Debug)]
pub enum LeaveOutcome {
    /// The last member left; the channel no longer exists
    Destroyed,
    /// The member left; the channel persists
    Left {
        /// Set when the creator left and another member was promoted
        new_creator: Option<AgentId>,
        /// Set when rotate-on-leave fired
        rotation: Option<RotationOutcome>,
    },
}

/// Manages group channels, their membership, and their key rotations.
///
/// All mutations of one channel serialize on the channel map's write
/// lock, so concurrent rotations always produce distinct keys and a
/// strictly increasing version sequence.
pub struct ChannelManager {
    registry: Arc<IdentityRegistry>,
    audit: Arc<AuditLog>,
    config: ChannelManagerConfig,
    channels: RwLock<HashMap<String, Channel>>,
    pending_invitations: Mutex<HashMap<String, Vec<Invitation>>>,
    rotation_tasks: std::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ChannelManager {
    /// Create a manager.
    pub fn new(
        registry: Arc<IdentityRegistry>,
        audit: Arc<AuditLog>,
        config: ChannelManagerConfig,
    ) -> Self {
        Self {
            registry,
            audit,
            config,
            channels: RwLock::new(HashMap::new()),
            pending_invitations: Mutex::new(HashMap::new()),
            rotation_tasks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Create a channel with `creator` as its only member.
    ///
    /// The fresh key lands in the creator's keychain at version 1.
    pub async fn create(
        &self,
        name: impl Into<String>,
        creator_keychain: &mut Keychain,
    ) -> Result<Channel> {
        let creator_id = creator_keychain.agent_id().clone();
        // Gate on lifecycle: suspended or revoked creators cannot open
        // channels.
        self.registry.lookup_encryption_key(&creator_id).await?;

        let channel = Channel {
            id: format!("chan_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            creator_id: creator_id.clone(),
            members: BTreeSet::from([creator_id.clone()]),
            key_version: 1,
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        };

        let mut key = fresh_key();
        creator_keychain.insert_channel_key(&channel.id, key, 1);
        key.zeroize();

        self.channels
            .write()
            .await
            .insert(channel.id.clone(), channel.clone());

        self.audit
            .append(
                AuditEvent::new(AuditKind::ChannelCreated, "created")
                    .agent(creator_id.as_str())
                    .resource(&channel.id),
            )
            .await;
        Ok(channel)
    }

    /// The channel record, if it exists.
    pub async fn channel(&self, channel_id: &str) -> Result<Channel> {
        self.channels
            .read()
            .await
            .get(channel_id)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownChannel(channel_id.to_string()))
    }

    /// All channel records.
    pub async fn list(&self) -> Vec<Channel> {
        self.channels.read().await.values().cloned().collect()
    }

    /// Invite `invitee` into a channel.
    ///
    /// The inviter must be a member holding the current key; the
    /// invitation seals that key to the invitee's registered encryption
    /// key.
    pub async fn invite(
        &self,
        channel_id: &str,
        invitee_id: &AgentId,
        inviter_keychain: &Keychain,
    ) -> Result<Invitation> {
        let inviter_id = inviter_keychain.agent_id().clone();
        let channel = self.channel(channel_id).await?;
        channel.require_member(&inviter_id)?;

        let (key, version) = inviter_keychain.channel_key(channel_id)?;
        if version != channel.key_version {
            return Err(ChannelError::KeyVersionMismatch {
                channel_id: channel_id.to_string(),
                local: version,
                envelope: channel.key_version,
            });
        }

        let invitee_public = self.registry.lookup_encryption_key(invitee_id).await?;
        Ok(seal_invitation(
            channel_id,
            invitee_id,
            &inviter_id,
            &key,
            version,
            invitee_public,
        ))
    }

    /// Accept an invitation: unseal the key, join the member set.
    ///
    /// A stale invitation (sealed under an older key version) fails fast
    /// with `KeyVersionMismatch`; the invitee must request a fresh one.
    pub async fn accept_invitation(
        &self,
        invitation: &Invitation,
        invitee_keychain: &mut Keychain,
    ) -> Result<()> {
        let invitee_id = invitee_keychain.agent_id().clone();
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(&invitation.channel_id)
            .ok_or_else(|| ChannelError::UnknownChannel(invitation.channel_id.clone()))?;

        if invitation.key_version != channel.key_version {
            return Err(ChannelError::KeyVersionMismatch {
                channel_id: channel.id.clone(),
                local: invitation.key_version,
                envelope: channel.key_version,
            });
        }

        let key_bytes = invitation
            .sealed_key
            .unseal(&invitee_keychain.encryption().secret)?;
        let key: [u8; SYMMETRIC_KEY_LEN] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| arbor_crypto::CryptoError::DecryptionFailed)?;

        invitee_keychain.insert_channel_key(&channel.id, key, invitation.key_version);

        if channel.members.insert(invitee_id.clone()) {
            self.audit
                .append(
                    AuditEvent::new(AuditKind::ChannelMemberJoined, "joined")
                        .agent(invitee_id.as_str())
                        .resource(&channel.id)
                        .metadata(serde_json::json!({
                            "inviter": invitation.inviter_id.as_str(),
                            "key_version": invitation.key_version,
                        })),
                )
                .await;
        }
        Ok(())
    }

    /// Publish an encrypted message to a channel.
    pub async fn send(
        &self,
        channel_id: &str,
        sender_keychain: &Keychain,
        message_type: impl Into<String>,
        payload: &[u8],
    ) -> Result<ChannelEnvelope> {
        let sender_id = sender_keychain.agent_id().clone();
        let channel = self.channel(channel_id).await?;
        channel.require_member(&sender_id)?;

        let (key, version) = sender_keychain.channel_key(channel_id)?;
        if version != channel.key_version {
            return Err(ChannelError::KeyVersionMismatch {
                channel_id: channel_id.to_string(),
                local: version,
                envelope: channel.key_version,
            });
        }

        let message_type = message_type.into();
        let aad = envelope_aad(channel_id, version, &message_type, &sender_id);
        let sealed = aead_encrypt(payload, &key, &aad);

        Ok(ChannelEnvelope {
            channel_id: channel_id.to_string(),
            key_version: version,
            message_type,
            sender_id,
            sealed,
            sent_at: Utc::now(),
        })
    }

    /// Deliver an envelope to one member.
    ///
    /// Non-members are refused regardless of what keys they hold; a key
    /// version mismatch is refused before any decryption attempt.
    pub async fn receive(
        &self,
        envelope: &ChannelEnvelope,
        member_keychain: &Keychain,
    ) -> Result<Vec<u8>> {
        let member_id = member_keychain.agent_id().clone();
        let channel = self.channel(&envelope.channel_id).await?;
        channel.require_member(&member_id)?;

        let (key, version) = member_keychain.channel_key(&envelope.channel_id)?;
        if version != envelope.key_version {
            return Err(ChannelError::KeyVersionMismatch {
                channel_id: envelope.channel_id.clone(),
                local: version,
                envelope: envelope.key_version,
            });
        }

        let aad = envelope_aad(
            &envelope.channel_id,
            envelope.key_version,
            &envelope.message_type,
            &envelope.sender_id,
        );
        Ok(aead_decrypt(&envelope.sealed, &key, &aad)?)
    }

    /// Leave a channel.
    ///
    /// The departing member's key is dropped from their keychain. The
    /// last member leaving destroys the channel; a departing creator is
    /// replaced by the smallest remaining member id, deterministically.
    pub async fn leave(
        &self,
        channel_id: &str,
        member_keychain: &mut Keychain,
    ) -> Result<LeaveOutcome> {
        let member_id = member_keychain.agent_id().clone();
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(channel_id)
            .ok_or_else(|| ChannelError::UnknownChannel(channel_id.to_string()))?;
        channel.require_member(&member_id)?;

        channel.members.remove(&member_id);
        member_keychain.remove_channel_key(channel_id);

        self.audit
            .append(
                AuditEvent::new(AuditKind::ChannelMemberLeft, "left")
                    .agent(member_id.as_str())
                    .resource(channel_id),
            )
            .await;

        if channel.members.is_empty() {
            channels.remove(channel_id);
            drop(channels);
            self.abort_rotation_task(channel_id);
            self.pending_invitations.lock().await.remove(channel_id);
            self.audit
                .append(
                    AuditEvent::new(AuditKind::ChannelDestroyed, "last member left")
                        .resource(channel_id),
                )
                .await;
            return Ok(LeaveOutcome::Destroyed);
        }

        let new_creator = if channel.creator_id == member_id {
            let successor = channel
                .members
                .iter()
                .next()
                .expect("non-empty member set")
                .clone();
            channel.creator_id = successor.clone();
            Some(successor)
        } else {
            None
        };

        let rotation = if self.config.rotate_on_leave {
            Some(self.rotate_locked(channel).await)
        } else {
            None
        };

        Ok(LeaveOutcome::Left {
            new_creator,
            rotation,
        })
    }

    /// Revoke a member. Creator-only; always rotates the key.
    pub async fn revoke(
        &self,
        channel_id: &str,
        target_id: &AgentId,
        revoker_id: &AgentId,
    ) -> Result<RotationOutcome> {
        if revoker_id == target_id {
            return Err(ChannelError::CannotRevokeSelf);
        }

        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(channel_id)
            .ok_or_else(|| ChannelError::UnknownChannel(channel_id.to_string()))?;
        if channel.creator_id != *revoker_id {
            return Err(ChannelError::NotCreator(revoker_id.clone()));
        }
        channel.require_member(target_id)?;

        channel.members.remove(target_id);
        self.audit
            .append(
                AuditEvent::new(AuditKind::ChannelMemberRevoked, "revoked")
                    .agent(target_id.as_str())
                    .resource(channel_id)
                    .metadata(serde_json::json!({"revoker": revoker_id.as_str()})),
            )
            .await;

        Ok(self.rotate_locked(channel).await)
    }

    /// Rotate the channel key. Creator-only.
    ///
    /// Returns sealed re-invitations for every remaining member,
    /// requester included; nobody holds the new key until they accept.
    pub async fn rotate_key(
        &self,
        channel_id: &str,
        requester_id: &AgentId,
    ) -> Result<RotationOutcome> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(channel_id)
            .ok_or_else(|| ChannelError::UnknownChannel(channel_id.to_string()))?;
        if channel.creator_id != *requester_id {
            return Err(ChannelError::NotCreator(requester_id.clone()));
        }
        Ok(self.rotate_locked(channel).await)
    }

    /// Start periodic timer-driven rotation for a channel.
    ///
    /// Each tick rotates the key and parks the re-invitations for pickup
    /// via [`ChannelManager::take_pending_invitations`]. Scheduling again
    /// replaces the previous timer.
    pub async fn schedule_rotation(
        self: &Arc<Self>,
        channel_id: &str,
        interval: std::time::Duration,
    ) -> Result<()> {
        // Fail early on unknown channels rather than in the timer task.
        self.channel(channel_id).await?;

        let manager = Arc::downgrade(self);
        let id = channel_id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; swallow it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if manager.timer_rotate(&id).await.is_err() {
                    // Channel is gone; the timer dies with it.
                    break;
                }
            }
        });

        if let Some(previous) = self
            .rotation_tasks
            .lock()
            .expect("rotation task registry is never poisoned")
            .insert(channel_id.to_string(), handle)
        {
            previous.abort();
        }
        Ok(())
    }

    /// Stop a scheduled rotation.
    pub fn cancel_scheduled_rotation(&self, channel_id: &str) -> Result<()> {
        self.abort_rotation_task(channel_id)
            .then_some(())
            .ok_or_else(|| ChannelError::NoScheduledRotation(channel_id.to_string()))
    }

    /// Drain parked re-invitations addressed to `agent_id`.
    pub async fn take_pending_invitations(
        &self,
        channel_id: &str,
        agent_id: &AgentId,
    ) -> Vec<Invitation> {
        let mut pending = self.pending_invitations.lock().await;
        let Some(invitations) = pending.get_mut(channel_id) else {
            return Vec::new();
        };
        let (mine, rest): (Vec<_>, Vec<_>) = invitations
            .drain(..)
            .partition(|i| i.invitee_id == *agent_id);
        *invitations = rest;
        mine
    }

    async fn timer_rotate(&self, channel_id: &str) -> Result<()> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(channel_id)
            .ok_or_else(|| ChannelError::UnknownChannel(channel_id.to_string()))?;
        let outcome = self.rotate_locked(channel).await;
        drop(channels);

        self.pending_invitations
            .lock()
            .await
            .entry(channel_id.to_string())
            .or_default()
            .extend(outcome.reinvitations);
        Ok(())
    }

    /// Rotate under the channel map's write lock.
    ///
    /// Generates a fresh key, bumps the version, and seals the key to
    /// every remaining member whose identity still resolves. The raw key
    /// is wiped before returning; it survives only inside the sealed
    /// envelopes.
    async fn rotate_locked(&self, channel: &mut Channel) -> RotationOutcome {
        let mut key = fresh_key();
        channel.key_version += 1;

        let mut reinvitations = Vec::with_capacity(channel.members.len());
        for member in &channel.members {
            match self.registry.lookup_encryption_key(member).await {
                Ok(member_public) => reinvitations.push(seal_invitation(
                    &channel.id,
                    member,
                    &channel.creator_id,
                    &key,
                    channel.key_version,
                    member_public,
                )),
                Err(e) => {
                    tracing::warn!(
                        channel = %channel.id,
                        member = %member,
                        error = %e,
                        "member unreachable during rotation, skipping re-invitation"
                    );
                }
            }
        }
        key.zeroize();

        self.audit
            .append(
                AuditEvent::new(AuditKind::ChannelKeyRotated, "rotated")
                    .resource(&channel.id)
                    .metadata(serde_json::json!({
                        "key_version": channel.key_version,
                        "members": channel.members.len(),
                    })),
            )
            .await;

        RotationOutcome {
            key_version: channel.key_version,
            reinvitations,
        }
    }

    fn abort_rotation_task(&self, channel_id: &str) -> bool {
        let handle = self
            .rotation_tasks
            .lock()
            .expect("rotation task registry is never poisoned")
            .remove(channel_id);
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.rotation_tasks.lock() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn fresh_key() -> [u8; SYMMETRIC_KEY_LEN] {
    let mut key = [0u8; SYMMETRIC_KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

fn envelope_aad(channel_id: &str, key_version: u64, message_type: &str, sender: &AgentId) -> Vec<u8> {
    format!("{channel_id}|{key_version}|{message_type}|{sender}").into_bytes()
}

fn seal_invitation(
    channel_id: &str,
    invitee_id: &AgentId,
    inviter_id: &AgentId,
    key: &[u8; SYMMETRIC_KEY_LEN],
    key_version: u64,
    invitee_public: [u8; 32],
) -> Invitation {
    let recipient = arbor_crypto::EncryptionPublicKey::from(invitee_public);
    Invitation {
        channel_id: channel_id.to_string(),
        invitee_id: invitee_id.clone(),
        inviter_id: inviter_id.clone(),
        key_version,
        sealed_key: SealedEnvelope::seal(key, &recipient),
        invited_at: Utc::now(),
    }
}
