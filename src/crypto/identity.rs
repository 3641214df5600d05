//! Long-term swap identity: an Ed25519 signing key pair whose public key
//! doubles as the stable peer id, plus the X25519 encryption key pair
//! deterministically derived from it.

use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};

use crate::error::{Error, Result};
use crate::protocol::PeerId;

/// Clamp a 32-byte scalar per the X25519 convention: clear the low three
/// bits, clear the high bit, and set the second-highest bit. This must
/// match exactly — peer-id-derived public keys only agree if every peer
/// clamps identically.
fn clamp_scalar(mut bytes: [u8; 32]) -> [u8; 32] {
    bytes[0] &= 248;
    bytes[31] &= 127;
    bytes[31] |= 64;
    bytes
}

/// Derive the X25519 private scalar for an identity from its Ed25519
/// signing seed: clamp the first 32 bytes of the seed's SHA-512 digest.
fn derive_encryption_scalar(seed: &[u8; 32]) -> [u8; 32] {
    let digest = Sha512::digest(seed);
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&digest[..32]);
    clamp_scalar(scalar)
}

/// Convert an Edwards public point (an Ed25519 public key, i.e. a
/// `PeerId`) into its Montgomery u-coordinate — the X25519 public key an
/// envelope is sealed against.
pub fn peer_id_to_montgomery(peer_id: &PeerId) -> Result<[u8; 32]> {
    let compressed = CompressedEdwardsY(*peer_id.as_bytes());
    let point = compressed
        .decompress()
        .ok_or_else(|| Error::Malformed("peer id is not a valid Edwards point".into()))?;
    Ok(point.to_montgomery().to_bytes())
}

/// A participant's long-term identity.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    encryption_scalar: [u8; 32],
}

impl Identity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Construct from an existing Ed25519 signing seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let seed = signing_key.to_bytes();
        let encryption_scalar = derive_encryption_scalar(&seed);
        Self {
            signing_key,
            encryption_scalar,
        }
    }

    /// The stable peer identifier: the Ed25519 public key.
    pub fn peer_id(&self) -> PeerId {
        PeerId::new(self.signing_key.verifying_key().to_bytes())
    }

    /// The locally-held X25519 private scalar, used to open envelopes
    /// addressed to this identity.
    pub fn encryption_scalar(&self) -> &[u8; 32] {
        &self.encryption_scalar
    }
}
