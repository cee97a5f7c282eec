/// The encrypted+signed envelope carried on every data frame
///
/// The inner [`ProtocolMessage`] travels AEAD-sealed; the outer
/// [`ProtocolFrame`] is what the rendezvous router relays. First frames carry
/// a KEM ciphertext and are sealed under the KEM secret; subsequent frames
/// have an empty ciphertext and are sealed under the derived session key.
use crate::crypto::{self, SharedKey, FRAME_NONCE_LEN};
use crate::identity::ServiceIdentity;
use crate::service::{ConvoTag, Introduction, ServiceInfo, Signature64};
use serde::{Deserialize, Serialize};

/// What kind of payload a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolType {
    /// Small text/liveness payloads
    Text,
    /// Application traffic
    Traffic,
}

/// The plaintext interior of a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub protocol: ProtocolType,

    /// Conversation this message belongs to
    pub tag: ConvoTag,

    /// Who sent it; frames are signed under this identity
    pub sender: ServiceInfo,

    /// Where replies should be addressed
    pub intro_reply: Introduction,

    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// The sealed wire frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolFrame {
    /// Random per-frame nonce (N)
    pub nonce: [u8; FRAME_NONCE_LEN],

    /// KEM ciphertext (C); empty on subsequent frames
    #[serde(with = "serde_bytes")]
    pub kem_ciphertext: Vec<u8>,

    /// Conversation tag (T)
    pub tag: ConvoTag,

    /// Sequence number (S); 0 only on the first frame of a conversation
    pub sequence: u64,

    /// AEAD-sealed [`ProtocolMessage`]
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,

    /// Signature (Z) over the other fields, by the sender identity
    pub signature: Signature64,
}

impl ProtocolFrame {
    /// Seal `message` under `key` and sign the frame
    pub fn encrypt_and_sign(
        message: &ProtocolMessage,
        nonce: [u8; FRAME_NONCE_LEN],
        kem_ciphertext: Vec<u8>,
        sequence: u64,
        key: &SharedKey,
        identity: &ServiceIdentity,
    ) -> Result<Self, FrameError> {
        let plaintext =
            bincode::serialize(message).map_err(|e| FrameError::Serialization(e.to_string()))?;
        let body =
            crypto::aead_seal(key, &nonce, &plaintext).map_err(|_| FrameError::Encryption)?;

        let mut frame = Self {
            nonce,
            kem_ciphertext,
            tag: message.tag,
            sequence,
            body,
            signature: Signature64::ZERO,
        };
        frame.signature = Signature64(identity.sign(&frame.signing_data()));
        Ok(frame)
    }

    /// Open the frame under `key` and verify the signature against the
    /// sender advertised inside
    pub fn decrypt_and_verify(&self, key: &SharedKey) -> Result<ProtocolMessage, FrameError> {
        let plaintext =
            crypto::aead_open(key, &self.nonce, &self.body).map_err(|_| FrameError::Decryption)?;
        let message: ProtocolMessage =
            bincode::deserialize(&plaintext).map_err(|e| FrameError::Serialization(e.to_string()))?;

        if message.tag != self.tag {
            return Err(FrameError::TagMismatch);
        }
        if !message.sender.verify(&self.signing_data(), &self.signature.0) {
            return Err(FrameError::BadSignature);
        }
        Ok(message)
    }

    /// True if this frame opens a conversation (carries a KEM ciphertext)
    pub fn is_handshake(&self) -> bool {
        !self.kem_ciphertext.is_empty()
    }

    fn signing_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&self.nonce);
        data.extend_from_slice(&self.kem_ciphertext);
        data.extend_from_slice(self.tag.as_bytes());
        data.extend_from_slice(&self.sequence.to_le_bytes());
        data.extend_from_slice(&self.body);
        data
    }
}

/// Frame sealing/opening errors
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame encryption failed")]
    Encryption,

    #[error("Frame decryption failed")]
    Decryption,

    #[error("Frame serialization failed: {0}")]
    Serialization(String),

    #[error("Frame signature invalid")]
    BadSignature,

    #[error("Inner tag does not match frame tag")]
    TagMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilnet_common::{PathId, RouterId, Timestamp};

    fn test_message(identity: &ServiceIdentity) -> ProtocolMessage {
        ProtocolMessage {
            protocol: ProtocolType::Text,
            tag: ConvoTag::random(),
            sender: identity.service_info(),
            intro_reply: Introduction::new(
                RouterId::from([5u8; 32]),
                PathId::random(),
                Timestamp::from_millis(90_000),
            ),
            payload: b"BEEP".to_vec(),
        }
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let identity = ServiceIdentity::generate().unwrap();
        let message = test_message(&identity);
        let key = [9u8; 32];

        let frame = ProtocolFrame::encrypt_and_sign(
            &message,
            crypto::random_nonce(),
            Vec::new(),
            3,
            &key,
            &identity,
        )
        .unwrap();

        assert!(!frame.is_handshake());
        let opened = frame.decrypt_and_verify(&key).unwrap();
        assert_eq!(opened, message);
    }

    #[test]
    fn test_wrong_key_fails() {
        let identity = ServiceIdentity::generate().unwrap();
        let message = test_message(&identity);

        let frame = ProtocolFrame::encrypt_and_sign(
            &message,
            crypto::random_nonce(),
            Vec::new(),
            1,
            &[1u8; 32],
            &identity,
        )
        .unwrap();

        assert!(matches!(
            frame.decrypt_and_verify(&[2u8; 32]),
            Err(FrameError::Decryption)
        ));
    }

    #[test]
    fn test_tampered_signature_fails() {
        let identity = ServiceIdentity::generate().unwrap();
        let message = test_message(&identity);
        let key = [9u8; 32];

        let mut frame = ProtocolFrame::encrypt_and_sign(
            &message,
            crypto::random_nonce(),
            Vec::new(),
            1,
            &key,
            &identity,
        )
        .unwrap();
        frame.signature.0[0] ^= 0xff;

        assert!(matches!(
            frame.decrypt_and_verify(&key),
            Err(FrameError::BadSignature)
        ));
    }

    #[test]
    fn test_frame_serializes() {
        let identity = ServiceIdentity::generate().unwrap();
        let message = test_message(&identity);
        let key = [4u8; 32];

        let frame = ProtocolFrame::encrypt_and_sign(
            &message,
            crypto::random_nonce(),
            vec![1, 2, 3],
            1,
            &key,
            &identity,
        )
        .unwrap();

        let encoded = bincode::serialize(&frame).unwrap();
        let decoded: ProtocolFrame = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.is_handshake());
    }
}
