/// Reachability descriptors for hidden services
///
/// An `Introduction` advertises one rendezvous hop; the signed `IntroSet`
/// collects a service's live introductions plus its handshake receiver key
/// and is what gets published into the DHT.
use super::{ServiceInfo, TopicTag};
use crate::crypto::PqPublicKey;
use crate::identity::ServiceIdentity;
use serde::{Deserialize, Serialize};
use veilnet_common::{PathId, RouterId, Timestamp};

/// Ed25519 signature wrapper (64 bytes) with serde support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature64(#[serde(with = "serde_bytes")] pub [u8; 64]);

impl Signature64 {
    pub const ZERO: Signature64 = Signature64([0u8; 64]);
}

/// "To reach me, send through `router` using `path_id`, before `expires_at`"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Introduction {
    /// The rendezvous router at the far end of the service's path
    pub router: RouterId,

    /// Receive path id at that router
    pub path_id: PathId,

    /// When this introduction stops being usable
    pub expires_at: Timestamp,
}

impl Introduction {
    pub fn new(router: RouterId, path_id: PathId, expires_at: Timestamp) -> Self {
        Self {
            router,
            path_id,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// The signed collection of introductions for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroSet {
    /// Who owns this descriptor
    pub service: ServiceInfo,

    /// Live introductions
    pub intros: Vec<Introduction>,

    /// Ephemeral-receiver key for the KEM leg of the handshake
    pub pq_key: PqPublicKey,

    /// Optional tag for tag-indexed lookup
    pub topic: TopicTag,

    /// Version stamp; refreshes are accepted only if strictly newer
    pub signed_at: Timestamp,

    /// Signature over all other fields under the owner's signing key
    pub signature: Signature64,
}

impl IntroSet {
    pub fn new(service: ServiceInfo, pq_key: PqPublicKey) -> Self {
        Self {
            service,
            intros: Vec::new(),
            pq_key,
            topic: TopicTag::EMPTY,
            signed_at: Timestamp::ZERO,
            signature: Signature64::ZERO,
        }
    }

    /// Sign under the identity, stamping the version
    pub fn sign(&mut self, identity: &ServiceIdentity, now: Timestamp) {
        self.signed_at = now;
        let data = self.signing_data();
        self.signature = Signature64(identity.sign(&data));
    }

    /// Verify the descriptor signature against its own service key
    pub fn verify(&self) -> bool {
        let data = self.signing_data();
        self.service.verify(&data, &self.signature.0)
    }

    /// True if any introduction has expired; the publisher is expected to
    /// refresh before this happens
    pub fn has_expired_intros(&self, now: Timestamp) -> bool {
        self.intros.iter().any(|intro| intro.is_expired(now))
    }

    /// True once every introduction is unusable
    pub fn all_intros_expired(&self, now: Timestamp) -> bool {
        !self.intros.is_empty() && self.intros.iter().all(|intro| intro.is_expired(now))
    }

    /// Monotone refresh predicate
    pub fn is_newer_than(&self, other: &IntroSet) -> bool {
        self.signed_at > other.signed_at
    }

    fn signing_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&self.service.signing);
        data.extend_from_slice(&self.service.encryption);
        for intro in &self.intros {
            data.extend_from_slice(intro.router.as_bytes());
            data.extend_from_slice(intro.path_id.as_bytes());
            data.extend_from_slice(&intro.expires_at.as_millis().to_le_bytes());
        }
        data.extend_from_slice(self.pq_key.as_bytes());
        data.extend_from_slice(self.topic.as_bytes());
        data.extend_from_slice(&self.signed_at.as_millis().to_le_bytes());
        data
    }
}
