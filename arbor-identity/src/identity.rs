//! Identity model

use crate::error::{IdentityError, Result};
use arbor_crypto::{derive_agent_id, EncryptionKeyPair, SigningKeyPair, PUBLIC_KEY_LEN};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key-derived agent identifier.
///
/// Format: `agent_` followed by 64 lowercase hex characters, the SHA-256
/// of the agent's signing public key. The binding is checked at
/// construction; an id can only be minted from key bytes or parsed from a
/// well-formed string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Derive the id for a signing public key.
    pub fn derive(signing_public: &[u8]) -> Self {
        Self(derive_agent_id(signing_public))
    }

    /// Parse and validate an id string.
    pub fn parse(s: &str) -> Result<Self> {
        let Some(hex_part) = s.strip_prefix("agent_") else {
            return Err(IdentityError::InvalidAgentId(s.to_string()));
        };
        let well_formed = hex_part.len() == 64
            && hex_part
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        if !well_formed {
            return Err(IdentityError::InvalidAgentId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a registered identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    /// Keys resolve, requests verify
    Active,
    /// Temporarily out of service; may be resumed
    Suspended,
    /// Terminal; never resolves again
    Revoked,
}

/// Public half of an identity as held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Key-derived identifier
    pub agent_id: AgentId,

    /// Ed25519 verification key
    #[serde(with = "hex::serde")]
    pub signing_public: [u8; PUBLIC_KEY_LEN],

    /// X25519 encryption key
    #[serde(with = "hex::serde")]
    pub encryption_public: [u8; PUBLIC_KEY_LEN],

    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// When the identity was created
    pub registered_at: DateTime<Utc>,
}

impl Identity {
    /// Build an identity from public key material; the id is derived, so
    /// it can never disagree with the signing key.
    pub fn new(
        signing_public: [u8; PUBLIC_KEY_LEN],
        encryption_public: [u8; PUBLIC_KEY_LEN],
        name: Option<String>,
    ) -> Self {
        Self {
            agent_id: AgentId::derive(&signing_public),
            signing_public,
            encryption_public,
            name,
            registered_at: Utc::now(),
        }
    }
}

/// An identity together with its private keys, as held by the agent itself.
pub struct LocalIdentity {
    /// The public identity to register
    pub identity: Identity,
    /// Ed25519 keypair
    pub signing: SigningKeyPair,
    /// X25519 keypair
    pub encryption: EncryptionKeyPair,
}

impl LocalIdentity {
    /// Generate a fresh identity with both keypairs.
    pub fn generate(name: Option<String>) -> Self {
        let signing = SigningKeyPair::generate();
        let encryption = EncryptionKeyPair::generate();
        let identity = Identity::new(signing.public_bytes(), encryption.public_bytes(), name);
        Self {
            identity,
            signing,
            encryption,
        }
    }

    /// The derived agent id.
    pub fn agent_id(&self) -> &AgentId {
        &self.identity.agent_id
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("agent_id", &self.identity.agent_id)
            .finish_non_exhaustive()
    }
}
