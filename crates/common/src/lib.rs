use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

pub mod config;
pub mod contact;
pub mod error;
pub mod types;

pub use contact::RouterContact;
pub use error::{Result, VeilnetError};
pub use types::Timestamp;

pub const ROUTER_ID_LEN: usize = 32;
pub const PATH_ID_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid router id length: expected {expected}, got {actual}")]
    InvalidRouterId { expected: usize, actual: usize },
    #[error("invalid router id hex: {0}")]
    InvalidRouterIdHex(String),
    #[error("invalid path id length: expected {expected}, got {actual}")]
    InvalidPathId { expected: usize, actual: usize },
}

/// Identity of a relay in the overlay, derived from its long-term key.
///
/// Doubles as a DHT key: descriptor publish locations and lookup targets
/// are compared against router ids by XOR distance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouterId([u8; ROUTER_ID_LEN]);

impl RouterId {
    pub const ZERO: RouterId = RouterId([0u8; ROUTER_ID_LEN]);

    pub fn from_bytes(bytes: [u8; ROUTER_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> std::result::Result<Self, DomainError> {
        if bytes.len() != ROUTER_ID_LEN {
            return Err(DomainError::InvalidRouterId {
                expected: ROUTER_ID_LEN,
                actual: bytes.len(),
            });
        }
        let mut array = [0u8; ROUTER_ID_LEN];
        array.copy_from_slice(bytes);
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; ROUTER_ID_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ROUTER_ID_LEN]
    }

    /// XOR distance in the DHT keyspace.
    pub fn distance(&self, other: &RouterId) -> Distance {
        let mut result = [0u8; ROUTER_ID_LEN];
        for i in 0..ROUTER_ID_LEN {
            result[i] = self.0[i] ^ other.0[i];
        }
        Distance(result)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, DomainError> {
        let decoded = hex::decode(hex_str)
            .map_err(|err| DomainError::InvalidRouterIdHex(err.to_string()))?;
        Self::from_slice(&decoded)
    }

    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouterId({}...)", self.short_hex())
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_hex())
    }
}

impl From<[u8; ROUTER_ID_LEN]> for RouterId {
    fn from(value: [u8; ROUTER_ID_LEN]) -> Self {
        Self::from_bytes(value)
    }
}

impl TryFrom<&[u8]> for RouterId {
    type Error = DomainError;

    fn try_from(value: &[u8]) -> std::result::Result<Self, Self::Error> {
        Self::from_slice(value)
    }
}

impl FromStr for RouterId {
    type Err = DomainError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// XOR distance between two router ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; ROUTER_ID_LEN]);

impl Distance {
    pub fn as_bytes(&self) -> &[u8; ROUTER_ID_LEN] {
        &self.0
    }

    pub fn leading_zeros(&self) -> u32 {
        let mut count = 0;
        for byte in self.0.iter() {
            let zeros = byte.leading_zeros();
            count += zeros;
            if zeros < 8 {
                break;
            }
        }
        count
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({}...)", hex::encode(&self.0[..4]))
    }
}

/// Identifier of one live path, unique per (upstream, rx id) pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathId([u8; PATH_ID_LEN]);

impl PathId {
    pub const ZERO: PathId = PathId([0u8; PATH_ID_LEN]);

    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; PATH_ID_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; PATH_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> std::result::Result<Self, DomainError> {
        if bytes.len() != PATH_ID_LEN {
            return Err(DomainError::InvalidPathId {
                expected: PATH_ID_LEN,
                actual: bytes.len(),
            });
        }
        let mut array = [0u8; PATH_ID_LEN];
        array.copy_from_slice(bytes);
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; PATH_ID_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; PATH_ID_LEN]
    }
}

impl fmt::Debug for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathId({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_id_rejects_wrong_length() {
        let err = RouterId::try_from(&[1u8; 16][..]).unwrap_err();
        assert!(matches!(err, DomainError::InvalidRouterId { .. }));
    }

    #[test]
    fn router_id_parses_hex_roundtrip() {
        let hex_id = "ab".repeat(ROUTER_ID_LEN);
        let parsed = RouterId::from_hex(&hex_id).expect("should parse valid hex");
        assert_eq!(parsed.to_hex(), hex_id);
    }

    #[test]
    fn router_id_rejects_bad_hex() {
        let err = RouterId::from_hex("not-hex").unwrap_err();
        assert!(matches!(err, DomainError::InvalidRouterIdHex(_)));
    }

    #[test]
    fn distance_is_symmetric_and_zero_to_self() {
        let a = RouterId::from([1u8; ROUTER_ID_LEN]);
        let b = RouterId::from([9u8; ROUTER_ID_LEN]);
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a).as_bytes(), &[0u8; ROUTER_ID_LEN]);
    }

    #[test]
    fn distance_ordering() {
        let origin = RouterId::from([0u8; ROUTER_ID_LEN]);
        let near = RouterId::from([1u8; ROUTER_ID_LEN]);
        let far = RouterId::from([255u8; ROUTER_ID_LEN]);
        assert!(origin.distance(&near) < origin.distance(&far));
    }

    #[test]
    fn path_id_random_is_unique() {
        assert_ne!(PathId::random(), PathId::random());
    }

    #[test]
    fn router_id_serializes() {
        let id = RouterId::from([7u8; ROUTER_ID_LEN]);
        let encoded = bincode::serialize(&id).unwrap();
        let decoded: RouterId = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, id);
    }
}
