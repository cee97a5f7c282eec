use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use fips203::ml_kem_1024;
use fips203::traits::{Decaps, Encaps, KeyGen, SerDes};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// Length of the derived per-conversation key
pub const SHARED_KEY_LEN: usize = 32;

/// Length of the frame nonce (XChaCha20-Poly1305)
pub const FRAME_NONCE_LEN: usize = 24;

/// Derived symmetric key material
pub type SharedKey = [u8; SHARED_KEY_LEN];

/// ML-KEM-1024 encapsulation key advertised in an intro set
///
/// Stored as raw bytes so it serializes into descriptors; decoded into the
/// fips203 type at encapsulation time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PqPublicKey(#[serde(with = "serde_bytes")] Vec<u8>);

impl PqPublicKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PqPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PqPublicKey({} bytes)", self.0.len())
    }
}

/// ML-KEM-1024 decapsulation key held by the receiving endpoint
#[derive(Clone)]
pub struct PqSecretKey(Vec<u8>);

impl PqSecretKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PqSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PqSecretKey(<redacted>)")
    }
}

/// Cryptographic errors
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("KEM operation failed")]
    Kem,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid key material")]
    InvalidKey,
}

/// Generate a fresh ML-KEM-1024 receiver keypair
pub fn pq_keygen() -> Result<(PqPublicKey, PqSecretKey), CryptoError> {
    let (ek, dk) = ml_kem_1024::KG::try_keygen().map_err(|_| CryptoError::Kem)?;
    Ok((
        PqPublicKey(ek.into_bytes().to_vec()),
        PqSecretKey(dk.into_bytes().to_vec()),
    ))
}

/// Encapsulate against a remote receiver key, yielding the wire ciphertext
/// and the 32-byte KEM secret
pub fn pq_encapsulate(public: &PqPublicKey) -> Result<(Vec<u8>, SharedKey), CryptoError> {
    let arr: [u8; ml_kem_1024::EK_LEN] =
        public.0.as_slice().try_into().map_err(|_| CryptoError::InvalidKey)?;
    let ek = ml_kem_1024::EncapsKey::try_from_bytes(arr).map_err(|_| CryptoError::InvalidKey)?;
    let (ssk, ct) = ek.try_encaps().map_err(|_| CryptoError::Kem)?;
    Ok((ct.into_bytes().to_vec(), ssk.into_bytes()))
}

/// Decapsulate a wire ciphertext under our receiver key
pub fn pq_decapsulate(ciphertext: &[u8], secret: &PqSecretKey) -> Result<SharedKey, CryptoError> {
    let dk_arr: [u8; ml_kem_1024::DK_LEN] =
        secret.0.as_slice().try_into().map_err(|_| CryptoError::InvalidKey)?;
    let dk = ml_kem_1024::DecapsKey::try_from_bytes(dk_arr).map_err(|_| CryptoError::InvalidKey)?;
    let ct_arr: [u8; ml_kem_1024::CT_LEN] =
        ciphertext.try_into().map_err(|_| CryptoError::InvalidKey)?;
    let ct = ml_kem_1024::CipherText::try_from_bytes(ct_arr).map_err(|_| CryptoError::InvalidKey)?;
    let ssk = dk.try_decaps(&ct).map_err(|_| CryptoError::Kem)?;
    Ok(ssk.into_bytes())
}

/// Classical ECDH leg of the hybrid handshake, keyed by the frame nonce
///
/// Both sides compute the same value: x25519 commutes and the nonce is
/// carried on the wire.
pub fn hybrid_dh(
    local_secret: &StaticSecret,
    remote_public: &[u8; 32],
    nonce: &[u8; FRAME_NONCE_LEN],
) -> [u8; 32] {
    let remote = X25519Public::from(*remote_public);
    let shared = local_secret.diffie_hellman(&remote);

    let mut hasher = blake3::Hasher::new_derive_key("VEILNET-HYBRID-DH-V1");
    hasher.update(nonce);
    hasher.update(shared.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Short hash used to compress handshake material into a session key
pub fn shorthash(data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("VEILNET-SHORTHASH-V1");
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Fold the KEM secret and the ECDH secret into the per-conversation key
pub fn derive_session_key(kem_secret: &SharedKey, dh_secret: &[u8; 32]) -> SharedKey {
    let mut tmp = [0u8; 64];
    tmp[..32].copy_from_slice(kem_secret);
    tmp[32..].copy_from_slice(dh_secret);
    shorthash(&tmp)
}

/// AEAD-seal a frame body
pub fn aead_seal(
    key: &SharedKey,
    nonce: &[u8; FRAME_NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Open a sealed frame body
pub fn aead_open(
    key: &SharedKey,
    nonce: &[u8; FRAME_NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Fresh random frame nonce
pub fn random_nonce() -> [u8; FRAME_NONCE_LEN] {
    let mut nonce = [0u8; FRAME_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}
