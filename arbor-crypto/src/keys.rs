//! Key material and asymmetric operations
//!
//! Ed25519 for signatures, X25519 for Diffie-Hellman. Private halves never
//! leave this process; the registry and wire formats only ever carry the
//! public 32 bytes.

use crate::error::{CryptoError, Result};
use crate::{PUBLIC_KEY_LEN, SIGNATURE_LEN};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// X25519 public key used for sealed envelopes and ratchet sessions.
pub type EncryptionPublicKey = x25519_dalek::PublicKey;

/// X25519 secret key held locally by an identity.
pub type EncryptionSecretKey = x25519_dalek::StaticSecret;

/// Ed25519 keypair used by identities and the system authority.
pub struct SigningKeyPair {
    keypair: ed25519_compact::KeyPair,
}

impl SigningKeyPair {
    /// Generate a fresh keypair from the system CSPRNG.
    pub fn generate() -> Self {
        Self {
            keypair: ed25519_compact::KeyPair::generate(),
        }
    }

    /// Public verification key.
    pub fn public(&self) -> ed25519_compact::PublicKey {
        self.keypair.pk
    }

    /// Public verification key as raw bytes.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        *self.keypair.pk
    }

    /// Sign a message, returning the detached 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        *self.keypair.sk.sign(message, None)
    }

    /// Secret key bytes for encrypted at-rest storage.
    ///
    /// Returned in a [`zeroize::Zeroizing`] buffer; callers must only hand
    /// the bytes to [`crate::EncryptedKey::seal`].
    pub fn secret_bytes(&self) -> zeroize::Zeroizing<Vec<u8>> {
        zeroize::Zeroizing::new(self.keypair.sk.to_vec())
    }

    /// Rebuild a keypair from stored secret bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let sk = ed25519_compact::SecretKey::from_slice(bytes).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: ed25519_compact::SecretKey::BYTES,
                actual: bytes.len(),
            }
        })?;
        let pk = sk.public_key();
        Ok(Self {
            keypair: ed25519_compact::KeyPair { pk, sk },
        })
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret half intentionally omitted.
        f.debug_struct("SigningKeyPair")
            .field("public", &hex::encode(self.public_bytes()))
            .finish_non_exhaustive()
    }
}

/// X25519 keypair used for sealed envelopes and session bootstrap.
#[derive(Clone)]
pub struct EncryptionKeyPair {
    /// Public half, shareable through the registry.
    pub public: EncryptionPublicKey,
    /// Secret half, held by the owning identity only.
    pub secret: EncryptionSecretKey,
}

impl EncryptionKeyPair {
    /// Generate a fresh keypair from the system CSPRNG.
    pub fn generate() -> Self {
        let secret = EncryptionSecretKey::random_from_rng(OsRng);
        let public = EncryptionPublicKey::from(&secret);
        Self { public, secret }
    }

    /// Rebuild a keypair from a stored secret.
    pub fn from_secret(secret: EncryptionSecretKey) -> Self {
        let public = EncryptionPublicKey::from(&secret);
        Self { public, secret }
    }

    /// Public half as raw bytes.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public.to_bytes()
    }

    /// Secret key bytes for encrypted at-rest storage.
    pub fn secret_bytes(&self) -> zeroize::Zeroizing<Vec<u8>> {
        zeroize::Zeroizing::new(self.secret.to_bytes().to_vec())
    }

    /// Rebuild a keypair from stored secret bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self::from_secret(EncryptionSecretKey::from(arr)))
    }
}

impl std::fmt::Debug for EncryptionKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKeyPair")
            .field("public", &hex::encode(self.public_bytes()))
            .finish_non_exhaustive()
    }
}

/// Sign a message with a keypair, returning the detached signature.
pub fn sign(message: &[u8], keypair: &SigningKeyPair) -> [u8; SIGNATURE_LEN] {
    keypair.sign(message)
}

/// Verify a detached Ed25519 signature.
///
/// Returns `false` for any failure, including malformed signature or key
/// bytes. Never panics on attacker-controlled input.
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(pk) = ed25519_compact::PublicKey::from_slice(public_key) else {
        return false;
    };
    let Ok(sig) = ed25519_compact::Signature::from_slice(signature) else {
        return false;
    };
    pk.verify(message, &sig).is_ok()
}

/// Parse a 32-byte Ed25519 public key, failing at the boundary on bad input.
pub fn signing_public_from_bytes(bytes: &[u8]) -> Result<ed25519_compact::PublicKey> {
    ed25519_compact::PublicKey::from_slice(bytes)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// X25519 Diffie-Hellman: derive the 32-byte shared secret.
pub fn ecdh(secret: &EncryptionSecretKey, public: &EncryptionPublicKey) -> [u8; 32] {
    *secret.diffie_hellman(public).as_bytes()
}

/// Derive the canonical agent id from a signing public key.
///
/// Format: `agent_` followed by 64 lowercase hex characters
/// (SHA-256 of the 32 public key bytes).
pub fn derive_agent_id(signing_public: &[u8]) -> String {
    let digest = Sha256::digest(signing_public);
    format!("agent_{}", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let keypair = SigningKeyPair::generate();
        let message = b"authorize arbor://fs/read/docs";
        let signature = sign(message, &keypair);

        assert!(verify(message, &signature, &keypair.public_bytes()));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let keypair = SigningKeyPair::generate();
        let message = b"authorize arbor://fs/read/docs";
        let signature = sign(message, &keypair);

        // Tampered message
        assert!(!verify(b"authorize arbor://fs/write/docs", &signature, &keypair.public_bytes()));

        // Tampered signature
        let mut bad_sig = signature;
        bad_sig[0] ^= 0xff;
        assert!(!verify(message, &bad_sig, &keypair.public_bytes()));

        // Wrong key
        let other = SigningKeyPair::generate();
        assert!(!verify(message, &signature, &other.public_bytes()));

        // Malformed inputs never panic
        assert!(!verify(message, &signature[..10], &keypair.public_bytes()));
        assert!(!verify(message, &signature, &[0u8; 5]));
    }

    #[test]
    fn test_ecdh_agreement() {
        let alice = EncryptionKeyPair::generate();
        let bob = EncryptionKeyPair::generate();

        let ab = ecdh(&alice.secret, &bob.public);
        let ba = ecdh(&bob.secret, &alice.public);
        assert_eq!(ab, ba);

        let carol = EncryptionKeyPair::generate();
        assert_ne!(ab, ecdh(&alice.secret, &carol.public));
    }

    #[test]
    fn test_agent_id_format() {
        let keypair = SigningKeyPair::generate();
        let agent_id = derive_agent_id(&keypair.public_bytes());

        assert!(agent_id.starts_with("agent_"));
        assert_eq!(agent_id.len(), "agent_".len() + 64);
        assert!(agent_id["agent_".len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        // Deterministic
        assert_eq!(agent_id, derive_agent_id(&keypair.public_bytes()));
    }
}
