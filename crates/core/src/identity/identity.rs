use crate::crypto::{self, PqPublicKey, PqSecretKey};
use crate::service::ServiceInfo;
use ed25519_dalek::{Signer, SigningKey};
use fips203::ml_kem_1024;
use std::fmt;
use std::path::Path;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// Size of the persisted identity blob:
/// signing secret || encryption secret || KEM decapsulation key || KEM encapsulation key
const KEYFILE_LEN: usize = 32 + 32 + ml_kem_1024::DK_LEN + ml_kem_1024::EK_LEN;

/// The long-lived secret identity of one hidden service endpoint
///
/// Bundles the ed25519 signing key (descriptor signatures, frame
/// signatures), the x25519 static secret (classical handshake leg) and the
/// ML-KEM receiver keypair (post-quantum handshake leg). Only the secret
/// halves live here; the public halves travel as the plain byte arrays of
/// [`ServiceInfo`], which is all remote endpoints ever learn from our
/// intro set.
#[derive(Clone)]
pub struct ServiceIdentity {
    signing: SigningKey,
    enc_secret: StaticSecret,
    pq_public: PqPublicKey,
    pq_secret: PqSecretKey,
}

impl ServiceIdentity {
    /// Generate a fresh identity
    pub fn generate() -> Result<Self, IdentityError> {
        use rand::RngCore;
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        let (pq_public, pq_secret) =
            crypto::pq_keygen().map_err(|_| IdentityError::KeyGeneration)?;
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
            enc_secret: StaticSecret::random_from_rng(rand::rngs::OsRng),
            pq_public,
            pq_secret,
        })
    }

    /// Load the identity from `path`, generating and persisting a new one
    /// if the file does not exist yet
    pub fn ensure_keys(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            let blob = std::fs::read(path)?;
            Self::from_bytes(&blob)
        } else {
            let identity = Self::generate()?;
            std::fs::write(path, identity.to_bytes())?;
            Ok(identity)
        }
    }

    /// Serialize to the fixed-size keyfile blob
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(KEYFILE_LEN);
        blob.extend_from_slice(&self.signing.to_bytes());
        blob.extend_from_slice(&self.enc_secret.to_bytes());
        blob.extend_from_slice(self.pq_secret.as_bytes());
        blob.extend_from_slice(self.pq_public.as_bytes());
        blob
    }

    /// Parse a keyfile blob
    pub fn from_bytes(blob: &[u8]) -> Result<Self, IdentityError> {
        if blob.len() != KEYFILE_LEN {
            return Err(IdentityError::InvalidKeyfile {
                expected: KEYFILE_LEN,
                actual: blob.len(),
            });
        }
        let mut sign_sk = [0u8; 32];
        sign_sk.copy_from_slice(&blob[..32]);
        let mut enc_sk = [0u8; 32];
        enc_sk.copy_from_slice(&blob[32..64]);
        let dk_end = 64 + ml_kem_1024::DK_LEN;

        Ok(Self {
            signing: SigningKey::from_bytes(&sign_sk),
            enc_secret: StaticSecret::from(enc_sk),
            pq_secret: PqSecretKey::from_bytes(blob[64..dk_end].to_vec()),
            pq_public: PqPublicKey::from_bytes(blob[dk_end..].to_vec()),
        })
    }

    /// The public half remote endpoints address us by
    pub fn service_info(&self) -> ServiceInfo {
        ServiceInfo::new(
            self.signing.verifying_key().to_bytes(),
            X25519Public::from(&self.enc_secret).to_bytes(),
        )
    }

    /// The advertised KEM receiver key
    pub fn pq_public(&self) -> &PqPublicKey {
        &self.pq_public
    }

    /// The KEM decapsulation key, needed on inbound first frames
    pub fn pq_secret(&self) -> &PqSecretKey {
        &self.pq_secret
    }

    /// The x25519 static secret for the classical handshake leg
    pub fn enc_secret(&self) -> &StaticSecret {
        &self.enc_secret
    }

    /// Sign a message under the identity signing key
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl fmt::Debug for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceIdentity")
            .field("address", &self.service_info().address())
            .finish()
    }
}

/// Errors related to identity persistence
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Key generation failed")]
    KeyGeneration,

    #[error("Invalid keyfile: expected {expected} bytes, got {actual}")]
    InvalidKeyfile { expected: usize, actual: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
