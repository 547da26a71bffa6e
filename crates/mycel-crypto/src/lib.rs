//! Signature capability boundary for the Mycel mesh.
//!
//! The control plane never names a concrete algorithm. Everything that
//! signs or checks gossip goes through the [`Signer`] / [`Verifier`]
//! capabilities (generate-keypair, sign, verify), so the protocol logic
//! stays independent of whether a classical or post-quantum scheme backs
//! it. The default backend is Ed25519.

use ed25519_dalek::{
    Signature, Signer as DalekSigner, SigningKey, Verifier as DalekVerifier, VerifyingKey,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the signature backend.
///
/// These are construction-time failures only. A signature that merely
/// fails to check is not an error here - [`Verifier::verify`] reports
/// that as `false`.
#[derive(Debug, Error)]
pub enum Error {
    /// Key material could not be used to build a signer.
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

/// Unique node identifier (256-bit hash of the node's public key).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash a public key to derive the node's identity.
    pub fn from_public_key(pubkey: &[u8]) -> Self {
        let hash = blake3::hash(pubkey);
        Self(*hash.as_bytes())
    }

    /// Derive a NodeId from an arbitrary label. Useful for fixtures and
    /// operator-facing tooling where nodes are named, not keyed.
    pub fn from_name(name: &str) -> Self {
        let hash = blake3::hash(name.as_bytes());
        Self(*hash.as_bytes())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}...", &self.to_hex()[..8])
    }
}

/// Capability to sign bytes with a rotatable keypair.
pub trait Signer: Send {
    /// The public half of the current keypair.
    fn public_key(&self) -> Vec<u8>;

    /// Sign a message with the current private key.
    fn sign(&self, message: &[u8]) -> Vec<u8>;

    /// Replace the keypair with a freshly generated one.
    fn rotate(&mut self) -> Result<()>;
}

/// Capability to check a signature against an arbitrary public key.
///
/// Malformed keys or signatures are verification failures, never panics
/// or errors - adversarial input reaches this path directly.
pub trait Verifier: Send + Sync {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// Ed25519-backed signer.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    /// Build from a 32-byte secret seed (deterministic, for fixtures).
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = seed
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("seed must be 32 bytes, got {}", seed.len())))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    fn rotate(&mut self) -> Result<()> {
        let mut csprng = rand::rngs::OsRng;
        self.signing_key = SigningKey::generate(&mut csprng);
        Ok(())
    }
}

/// Ed25519-backed verifier. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(message, &sig).is_ok()
    }
}
