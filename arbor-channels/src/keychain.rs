//! Per-member channel keychains
//!
//! Each member holds channel keys locally, versioned so an envelope
//! sealed under a different key version is refused before any decryption
//! is attempted. The channel record itself never carries key material.

use crate::error::{ChannelError, Result};
use arbor_crypto::{EncryptionKeyPair, SYMMETRIC_KEY_LEN};
use arbor_identity::AgentId;
use std::collections::HashMap;
use zeroize::Zeroize;

#[derive(Clone)]
struct ChannelKeyEntry {
    key: [u8; SYMMETRIC_KEY_LEN],
    version: u64,
}

impl Drop for ChannelKeyEntry {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// One agent's local key material for group channels.
pub struct Keychain {
    agent_id: AgentId,
    encryption: EncryptionKeyPair,
    channel_keys: HashMap<String, ChannelKeyEntry>,
}

impl Keychain {
    /// Create a keychain around the agent's encryption keypair.
    ///
    /// The keypair is what invitations are sealed to; it must be the one
    /// registered for this agent.
    pub fn new(agent_id: AgentId, encryption: EncryptionKeyPair) -> Self {
        Self {
            agent_id,
            encryption,
            channel_keys: HashMap::new(),
        }
    }

    /// The owning agent.
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// The encryption keypair used to unseal invitations.
    pub fn encryption(&self) -> &EncryptionKeyPair {
        &self.encryption
    }

    /// Install (or replace) the key for a channel at a version.
    pub fn insert_channel_key(
        &mut self,
        channel_id: &str,
        key: [u8; SYMMETRIC_KEY_LEN],
        version: u64,
    ) {
        self.channel_keys
            .insert(channel_id.to_string(), ChannelKeyEntry { key, version });
    }

    /// The stored key and version for a channel.
    pub fn channel_key(&self, channel_id: &str) -> Result<([u8; SYMMETRIC_KEY_LEN], u64)> {
        self.channel_keys
            .get(channel_id)
            .map(|entry| (entry.key, entry.version))
            .ok_or_else(|| ChannelError::NoChannelKey(channel_id.to_string()))
    }

    /// The stored key version for a channel, if any.
    pub fn key_version(&self, channel_id: &str) -> Option<u64> {
        self.channel_keys.get(channel_id).map(|entry| entry.version)
    }

    /// Forget a channel's key (on leave or revocation).
    pub fn remove_channel_key(&mut self, channel_id: &str) {
        self.channel_keys.remove(channel_id);
    }

    /// Number of channels with stored keys.
    pub fn len(&self) -> usize {
        self.channel_keys.len()
    }

    /// Whether the keychain holds no channel keys.
    pub fn is_empty(&self) -> bool {
        self.channel_keys.is_empty()
    }
}

impl std::fmt::Debug for Keychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keychain")
            .field("agent_id", &self.agent_id)
            .field("channels", &self.channel_keys.len())
            .finish_non_exhaustive()
    }
}
