use serde::{Deserialize, Serialize};
use std::fmt;

pub const CONVO_TAG_LEN: usize = 16;
pub const TOPIC_TAG_LEN: usize = 16;

/// A random token naming one bidirectional conversation
///
/// Allocated by the initiator during the first-frame handshake; the 128-bit
/// space makes collisions a non-concern.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConvoTag([u8; CONVO_TAG_LEN]);

impl ConvoTag {
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; CONVO_TAG_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; CONVO_TAG_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONVO_TAG_LEN] {
        &self.0
    }
}

impl fmt::Debug for ConvoTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConvoTag({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for ConvoTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A short label services can advertise under for tag-indexed discovery
///
/// Stored zero-padded; the empty tag means "no topic".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicTag([u8; TOPIC_TAG_LEN]);

impl TopicTag {
    pub const EMPTY: TopicTag = TopicTag([0u8; TOPIC_TAG_LEN]);

    /// Build from a label, truncating to the tag width
    pub fn new(label: &str) -> Self {
        let mut bytes = [0u8; TOPIC_TAG_LEN];
        let raw = label.as_bytes();
        let len = raw.len().min(TOPIC_TAG_LEN);
        bytes[..len].copy_from_slice(&raw[..len]);
        Self(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; TOPIC_TAG_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; TOPIC_TAG_LEN] {
        &self.0
    }
}

impl fmt::Debug for TopicTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicTag({})", self)
    }
}

impl fmt::Display for TopicTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(TOPIC_TAG_LEN);
        write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convo_tags_are_unique() {
        assert_ne!(ConvoTag::random(), ConvoTag::random());
    }

    #[test]
    fn test_topic_tag_roundtrip() {
        let tag = TopicTag::new("market");
        assert_eq!(tag.to_string(), "market");
        assert!(!tag.is_empty());
        assert!(TopicTag::EMPTY.is_empty());
    }

    #[test]
    fn test_topic_tag_truncates() {
        let tag = TopicTag::new("a-very-long-label-that-exceeds-the-width");
        assert_eq!(tag.as_bytes().len(), TOPIC_TAG_LEN);
    }
}
