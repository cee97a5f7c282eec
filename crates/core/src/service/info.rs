use super::Address;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The public half of a service identity, as carried in intro sets
/// and protocol messages
///
/// Both keys travel as raw byte arrays; the signing key is only lifted
/// into an ed25519 verifier at verification time, so descriptors with
/// malformed keys simply fail to verify instead of failing to parse.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// ed25519 key descriptors and frames are signed under
    #[serde(with = "serde_bytes")]
    pub signing: [u8; 32],

    /// x25519 key for the classical handshake leg
    #[serde(with = "serde_bytes")]
    pub encryption: [u8; 32],
}

impl ServiceInfo {
    pub fn new(signing: [u8; 32], encryption: [u8; 32]) -> Self {
        Self {
            signing,
            encryption,
        }
    }

    /// Derive the public address. Invariant: a pure function of the keys.
    pub fn address(&self) -> Address {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"VEILNET-SERVICE-V1");
        hasher.update(&self.signing);
        hasher.update(&self.encryption);
        Address::from_bytes(*hasher.finalize().as_bytes())
    }

    /// Verify a signature made by this service; false when the advertised
    /// signing key is not a valid curve point
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        let key = match VerifyingKey::from_bytes(&self.signing) {
            Ok(key) => key,
            Err(_) => return false,
        };
        key.verify(message, &Signature::from_bytes(signature)).is_ok()
    }
}

impl fmt::Debug for ServiceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceInfo({})", self.address())
    }
}

impl fmt::Display for ServiceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address())
    }
}
