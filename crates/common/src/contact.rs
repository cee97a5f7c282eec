use crate::{RouterId, Timestamp};
use serde::{Deserialize, Serialize};

/// A relay's contact record as stored in the node database
///
/// Produced and verified by the node-db layer; the endpoint core only
/// consumes these when selecting hops and resolving introductions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterContact {
    /// Relay identity
    pub router_id: RouterId,

    /// Long-term identity key the id is derived from
    #[serde(with = "serde_bytes")]
    pub public_key: [u8; 32],

    /// Reachable addresses, as "host:port" strings
    pub addresses: Vec<String>,

    /// When this record was last refreshed
    pub last_seen: Timestamp,
}

impl RouterContact {
    pub fn new(router_id: RouterId, public_key: [u8; 32], addresses: Vec<String>) -> Self {
        Self {
            router_id,
            public_key,
            addresses,
            last_seen: Timestamp::ZERO,
        }
    }

    pub fn is_stale(&self, now: Timestamp, max_age_millis: u64) -> bool {
        now.millis_since(self.last_seen) > max_age_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness() {
        let mut rc = RouterContact::new(
            RouterId::from([1u8; 32]),
            [2u8; 32],
            vec!["10.0.0.1:9090".to_string()],
        );
        rc.last_seen = Timestamp::from_millis(1_000);

        assert!(!rc.is_stale(Timestamp::from_millis(2_000), 5_000));
        assert!(rc.is_stale(Timestamp::from_millis(10_000), 5_000));
    }
}
