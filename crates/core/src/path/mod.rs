/// Multi-hop paths and the pools that own them
pub mod builder;
pub mod set;

pub use builder::{AlignedHopSelector, BuildRequest, DefaultHopSelector, HopSelectError, HopSelector};
pub use set::{PathSet, PathSetError};

use crate::router::RoutingLink;
use crate::protocol::RoutingMessage;
use crate::service::Introduction;
use serde::{Deserialize, Serialize};
use veilnet_common::config::timing::PATH_LIFETIME;
use veilnet_common::{PathId, Result, RouterId, Timestamp, VeilnetError};

/// Lifecycle of one path; monotone in this order, with Timeout and Expired
/// terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathStatus {
    Building,
    Established,
    Timeout,
    Expired,
}

impl PathStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PathStatus::Timeout | PathStatus::Expired)
    }
}

/// Unique key of one live path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathInfo {
    pub upstream: RouterId,
    pub rx_id: PathId,
}

/// One multi-hop tunnel through the overlay
#[derive(Debug, Clone)]
pub struct Path {
    /// Relays from entry to terminal hop
    hops: Vec<RouterId>,

    /// Receive path id, allocated at build start
    rx_id: PathId,

    pub status: PathStatus,

    pub build_started: Timestamp,

    pub established_at: Option<Timestamp>,

    /// The introduction this path exposes once established
    intro: Introduction,
}

impl Path {
    pub fn new(hops: Vec<RouterId>, rx_id: PathId, now: Timestamp) -> Result<Self> {
        let endpoint = match hops.last() {
            Some(router) => *router,
            None => return Err(VeilnetError::internal("path needs at least one hop")),
        };
        Ok(Self {
            hops,
            rx_id,
            status: PathStatus::Building,
            build_started: now,
            established_at: None,
            intro: Introduction::new(endpoint, rx_id, Timestamp::ZERO),
        })
    }

    /// First hop; where the link layer sends our cells
    pub fn upstream(&self) -> RouterId {
        self.hops[0]
    }

    /// Terminal hop; the far end of the tunnel
    pub fn endpoint(&self) -> RouterId {
        self.hops[self.hops.len() - 1]
    }

    pub fn rx_id(&self) -> PathId {
        self.rx_id
    }

    pub fn hops(&self) -> &[RouterId] {
        &self.hops
    }

    pub fn info(&self) -> PathInfo {
        PathInfo {
            upstream: self.upstream(),
            rx_id: self.rx_id,
        }
    }

    /// The introduction advertising this path's far endpoint
    pub fn intro(&self) -> &Introduction {
        &self.intro
    }

    pub fn is_established(&self) -> bool {
        self.status == PathStatus::Established
    }

    /// Building → Established; stamps the advertised introduction
    pub fn mark_established(&mut self, now: Timestamp) {
        self.status = PathStatus::Established;
        self.established_at = Some(now);
        self.intro = Introduction::new(self.endpoint(), self.rx_id, now + PATH_LIFETIME);
    }

    pub fn send_routing_message(
        &self,
        link: &dyn RoutingLink,
        message: RoutingMessage,
    ) -> Result<()> {
        link.send_routing_message(self.upstream(), self.rx_id, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_requires_hops() {
        assert!(Path::new(Vec::new(), PathId::random(), Timestamp::ZERO).is_err());
    }

    #[test]
    fn test_establish_stamps_intro() {
        let hops = vec![RouterId::from([1u8; 32]), RouterId::from([2u8; 32])];
        let rx = PathId::random();
        let mut path = Path::new(hops, rx, Timestamp::from_millis(1_000)).unwrap();
        assert_eq!(path.status, PathStatus::Building);

        path.mark_established(Timestamp::from_millis(2_000));
        assert!(path.is_established());

        let intro = path.intro();
        assert_eq!(intro.router, RouterId::from([2u8; 32]));
        assert_eq!(intro.path_id, rx);
        assert_eq!(
            intro.expires_at,
            Timestamp::from_millis(2_000 + PATH_LIFETIME)
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(PathStatus::Timeout.is_terminal());
        assert!(PathStatus::Expired.is_terminal());
        assert!(!PathStatus::Building.is_terminal());
        assert!(!PathStatus::Established.is_terminal());
    }
}
