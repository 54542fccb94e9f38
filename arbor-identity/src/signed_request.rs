//! Signed request envelopes
//!
//! A caller proves control of its identity by signing
//! `agent_id | payload | nonce | signed_at` with its Ed25519 key. The
//! verifier gates on registry status, bounds `signed_at` to a replay
//! window, and rejects nonce reuse inside that window.

use crate::error::{IdentityError, Result};
use crate::identity::AgentId;
use crate::registry::IdentityRegistry;
use arbor_crypto::{verify, SigningKeyPair, SIGNATURE_LEN};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 16;

/// Default replay window.
pub const DEFAULT_REPLAY_WINDOW_SECONDS: i64 = 300;

/// A request signed by the agent that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequest {
    /// Signing agent
    pub agent_id: AgentId,

    /// Application payload, authenticated but not encrypted
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,

    /// Single-use random nonce
    #[serde(with = "hex::serde")]
    pub nonce: [u8; NONCE_LEN],

    /// When the request was signed
    pub signed_at: DateTime<Utc>,

    /// Ed25519 signature over the canonical bytes
    #[serde(with = "hex::serde")]
    pub signature: [u8; SIGNATURE_LEN],
}

impl SignedRequest {
    /// Sign `payload` as `agent_id`, stamping a fresh nonce and the
    /// current time.
    pub fn sign(agent_id: AgentId, payload: Vec<u8>, keypair: &SigningKeyPair) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let signed_at = Utc::now();

        let bytes = canonical_bytes(&agent_id, &payload, &nonce, signed_at);
        let signature = keypair.sign(&bytes);

        Self {
            agent_id,
            payload,
            nonce,
            signed_at,
            signature,
        }
    }

    /// The bytes the signature covers.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_bytes(&self.agent_id, &self.payload, &self.nonce, self.signed_at)
    }
}

fn canonical_bytes(
    agent_id: &AgentId,
    payload: &[u8],
    nonce: &[u8; NONCE_LEN],
    signed_at: DateTime<Utc>,
) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(agent_id.as_str().len() + payload.len() + NONCE_LEN + 32);
    bytes.extend_from_slice(agent_id.as_str().as_bytes());
    bytes.push(b'|');
    bytes.extend_from_slice(payload);
    bytes.push(b'|');
    bytes.extend_from_slice(nonce);
    bytes.push(b'|');
    bytes.extend_from_slice(
        signed_at
            .to_rfc3339_opts(SecondsFormat::Micros, true)
            .as_bytes(),
    );
    bytes
}

/// Verifies signed requests against the registry.
///
/// Holds the seen-nonce cache; one verifier instance per trust domain.
pub struct RequestVerifier {
    replay_window: chrono::Duration,
    seen_nonces: Mutex<HashMap<[u8; NONCE_LEN], DateTime<Utc>>>,
}

impl RequestVerifier {
    /// Create a verifier with the given replay window in seconds.
    pub fn new(replay_window_seconds: i64) -> Self {
        Self {
            replay_window: chrono::Duration::seconds(replay_window_seconds.max(1)),
            seen_nonces: Mutex::new(HashMap::new()),
        }
    }

    /// Verify a request: registry status, replay window, nonce
    /// freshness, then the Ed25519 signature.
    ///
    /// A verified nonce is remembered for the duration of the window, so
    /// replaying a captured request fails even though its signature is
    /// valid.
    pub async fn verify(&self, request: &SignedRequest, registry: &IdentityRegistry) -> Result<()> {
        let signing_public = registry.lookup(&request.agent_id).await?;

        let now = Utc::now();
        let age = now.signed_duration_since(request.signed_at);
        if age > self.replay_window || age < -self.replay_window {
            return Err(IdentityError::StaleSignature {
                signed_at: request.signed_at,
                window_seconds: self.replay_window.num_seconds(),
            });
        }

        {
            let mut seen = self.seen_nonces.lock().await;
            let horizon = now - self.replay_window;
            seen.retain(|_, at| *at > horizon);
            if seen.contains_key(&request.nonce) {
                return Err(IdentityError::NonceReplayed(request.agent_id.clone()));
            }
            seen.insert(request.nonce, request.signed_at);
        }

        if !verify(&request.canonical_bytes(), &request.signature, &signing_public) {
            return Err(IdentityError::InvalidSignature(request.agent_id.clone()));
        }
        Ok(())
    }
}

impl Default for RequestVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_WINDOW_SECONDS)
    }
}
