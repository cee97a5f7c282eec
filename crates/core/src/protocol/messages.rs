use super::frame::ProtocolFrame;
use crate::service::{Address, IntroSet, TopicTag};
use serde::{Deserialize, Serialize};
use veilnet_common::{PathId, RouterContact, RouterId};

/// What a descriptor lookup is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindIntroTarget {
    Address(Address),
    Tag(TopicTag),
}

/// DHT request/response envelopes carried inside routing messages
///
/// `relay_order` is the recursion/replication factor governing how many
/// DHT neighbors a request fans out to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DhtMessage {
    FindIntro {
        target: FindIntroTarget,
        txid: u64,
        relay_order: u64,
    },
    PublishIntro {
        intro_set: IntroSet,
        txid: u64,
        relay_order: u64,
    },
    FindRouter {
        key: RouterId,
        txid: u64,
    },
    GotIntro {
        txid: u64,
        intro_sets: Vec<IntroSet>,
    },
    GotRouter {
        contacts: Vec<RouterContact>,
    },
}

/// Hand a protocol frame to the rendezvous router for delivery onto the
/// remote's receive path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathTransferMessage {
    /// The encrypted frame (T)
    pub frame: ProtocolFrame,

    /// The remote's advertised receive path (P)
    pub path_id: PathId,

    /// Per-transfer random pad (Y)
    pub pad: [u8; 24],
}

impl PathTransferMessage {
    pub fn new(frame: ProtocolFrame, path_id: PathId) -> Self {
        Self {
            frame,
            path_id,
            pad: crate::crypto::random_nonce(),
        }
    }
}

/// Everything the core sends down a path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoutingMessage {
    Dht(Vec<DhtMessage>),
    PathTransfer(PathTransferMessage),
}
