/// Hybrid classical+post-quantum conversation keying
///
/// The first frame of a conversation encapsulates against the remote's
/// ML-KEM receiver key and mixes in a nonce-keyed x25519 exchange between
/// the two identities. Both sides derive the same session key; the first
/// frame itself is sealed under the KEM secret alone so the receiver can
/// open it before the classical leg is computed.
///
/// These functions are pure and run on the worker pool; completions re-enter
/// the endpoint logic as [`crate::runtime::EndpointEvent`]s.
use crate::crypto::{self, CryptoError, PqPublicKey, SharedKey};
use crate::identity::ServiceIdentity;
use crate::protocol::{FrameError, ProtocolFrame, ProtocolMessage, ProtocolType};
use crate::service::{ConvoTag, Introduction, ServiceInfo};

/// Inputs to first-frame generation, cloned out of endpoint state so the
/// job owns everything it touches
#[derive(Clone)]
pub struct IntroParams {
    pub identity: ServiceIdentity,
    pub remote: ServiceInfo,
    pub remote_pq: PqPublicKey,
    pub intro_reply: Introduction,
    pub protocol: ProtocolType,
    pub payload: Vec<u8>,
}

/// A generated first frame plus the cache entries to install for it
#[derive(Debug, Clone)]
pub struct IntroResult {
    pub frame: ProtocolFrame,
    pub shared_key: SharedKey,
    pub tag: ConvoTag,
    pub intro_reply: Introduction,
    pub remote: ServiceInfo,
}

/// A received and verified first frame
#[derive(Debug, Clone)]
pub struct InboundIntro {
    pub message: ProtocolMessage,
    pub shared_key: SharedKey,
}

/// Handshake errors
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("KEM encapsulation failed")]
    Encapsulation,

    #[error("KEM decapsulation failed")]
    Decapsulation,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Generate the first frame of a conversation
pub fn gen_intro(params: IntroParams) -> Result<IntroResult, HandshakeError> {
    let (kem_ciphertext, kem_secret) =
        crypto::pq_encapsulate(&params.remote_pq).map_err(|_| HandshakeError::Encapsulation)?;
    let nonce = crypto::random_nonce();

    let dh_secret = crypto::hybrid_dh(params.identity.enc_secret(), &params.remote.encryption, &nonce);
    let shared_key = crypto::derive_session_key(&kem_secret, &dh_secret);

    let tag = ConvoTag::random();
    let message = ProtocolMessage {
        protocol: params.protocol,
        tag,
        sender: params.identity.service_info(),
        intro_reply: params.intro_reply,
        payload: params.payload,
    };

    // sealed under the KEM secret; the derived key takes over from the
    // next frame on this tag
    let frame = ProtocolFrame::encrypt_and_sign(
        &message,
        nonce,
        kem_ciphertext,
        0,
        &kem_secret,
        &params.identity,
    )?;

    Ok(IntroResult {
        frame,
        shared_key,
        tag,
        intro_reply: params.intro_reply,
        remote: params.remote,
    })
}

/// Receive a first frame: decapsulate, open, verify, derive the session key
pub fn recv_intro(
    frame: &ProtocolFrame,
    identity: &ServiceIdentity,
) -> Result<InboundIntro, HandshakeError> {
    let kem_secret = crypto::pq_decapsulate(&frame.kem_ciphertext, identity.pq_secret())
        .map_err(|_| HandshakeError::Decapsulation)?;
    let message = frame.decrypt_and_verify(&kem_secret)?;

    let dh_secret = crypto::hybrid_dh(identity.enc_secret(), &message.sender.encryption, &frame.nonce);
    let shared_key = crypto::derive_session_key(&kem_secret, &dh_secret);

    Ok(InboundIntro {
        message,
        shared_key,
    })
}
