//! Encrypted storage for identity private keys
//!
//! Private keys rest wrapped in AES-256-GCM under a key derived from the
//! keystore's unlock secret and a per-entry context string. Each agent
//! owns its keystore; entries are never shared across identities.

use crate::error::{IdentityError, Result};
use crate::identity::AgentId;
use arbor_crypto::{EncryptedKey, EncryptionKeyPair, SigningKeyPair};
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Encrypted-at-rest private key storage for one holder.
pub struct Keystore {
    unlock_secret: Zeroizing<Vec<u8>>,
    entries: HashMap<String, EncryptedKey>,
}

impl Keystore {
    /// Open a keystore with its unlock secret.
    pub fn new(unlock_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            unlock_secret: Zeroizing::new(unlock_secret.into()),
            entries: HashMap::new(),
        }
    }

    /// Store an agent's signing keypair.
    pub fn store_signing(&mut self, agent_id: &AgentId, keypair: &SigningKeyPair) {
        let context = signing_context(agent_id);
        let wrapped = EncryptedKey::seal(&keypair.secret_bytes(), &self.unlock_secret, &context);
        self.entries.insert(context, wrapped);
    }

    /// Load an agent's signing keypair.
    pub fn load_signing(&self, agent_id: &AgentId) -> Result<SigningKeyPair> {
        let context = signing_context(agent_id);
        let wrapped = self
            .entries
            .get(&context)
            .ok_or_else(|| IdentityError::NoStoredKey(context.clone()))?;
        let bytes = wrapped.open(&self.unlock_secret, &context)?;
        Ok(SigningKeyPair::from_secret_bytes(&bytes)?)
    }

    /// Store an agent's encryption keypair.
    pub fn store_encryption(&mut self, agent_id: &AgentId, keypair: &EncryptionKeyPair) {
        let context = encryption_context(agent_id);
        let wrapped = EncryptedKey::seal(&keypair.secret_bytes(), &self.unlock_secret, &context);
        self.entries.insert(context, wrapped);
    }

    /// Load an agent's encryption keypair.
    pub fn load_encryption(&self, agent_id: &AgentId) -> Result<EncryptionKeyPair> {
        let context = encryption_context(agent_id);
        let wrapped = self
            .entries
            .get(&context)
            .ok_or_else(|| IdentityError::NoStoredKey(context.clone()))?;
        let bytes = wrapped.open(&self.unlock_secret, &context)?;
        Ok(EncryptionKeyPair::from_secret_bytes(&bytes)?)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the keystore holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Keystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystore")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

fn signing_context(agent_id: &AgentId) -> String {
    format!("{agent_id}/signing")
}

fn encryption_context(agent_id: &AgentId) -> String {
    format!("{agent_id}/encryption")
}
