/// Pending DHT lookups
///
/// Every in-flight query is one entry keyed by txid. The dynamic dispatch of
/// the lookup kinds collapses into [`LookupKind`]; the endpoint branches on
/// it when a response arrives or the deadline passes.
use super::{Address, IntroSet, TopicTag};
use crate::protocol::{DhtMessage, FindIntroTarget};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use tracing::info;
use veilnet_common::config::dht::LOOKUP_RELAY_ORDER;
use veilnet_common::config::timing::{ROUTER_LOOKUP_TIMEOUT, TAG_REFRESH_INTERVAL};
use veilnet_common::Timestamp;

/// Why a hidden service address is being resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPurpose {
    /// First contact; feeds `put_new_outbound_context`
    NewSession,

    /// Refresh of an existing outbound session's intro set
    IntroSetUpdate,
}

/// What a pending lookup is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    HiddenService {
        remote: Address,
        purpose: LookupPurpose,
    },
    Tag {
        tag: TopicTag,
    },
}

/// One in-flight DHT query
#[derive(Debug, Clone)]
pub struct PendingLookup {
    pub txid: u64,
    pub name: &'static str,
    pub started: Timestamp,
    pub deadline: Timestamp,
    pub kind: LookupKind,
}

impl PendingLookup {
    pub fn is_timed_out(&self, now: Timestamp) -> bool {
        now >= self.deadline
    }

    /// The request envelope for this lookup
    pub fn build_request(&self) -> DhtMessage {
        let target = match &self.kind {
            LookupKind::HiddenService { remote, .. } => FindIntroTarget::Address(*remote),
            LookupKind::Tag { tag } => FindIntroTarget::Tag(*tag),
        };
        DhtMessage::FindIntro {
            target,
            txid: self.txid,
            relay_order: LOOKUP_RELAY_ORDER,
        }
    }
}

/// The txid-keyed table of in-flight lookups
#[derive(Debug, Default)]
pub struct PendingLookupTable {
    lookups: HashMap<u64, PendingLookup>,
}

impl PendingLookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 64-bit uniform random txid; collisions with live entries resolved by
    /// incrementing
    pub fn gen_txid(&self) -> u64 {
        let mut txid = rand::rngs::OsRng.gen::<u64>();
        while self.lookups.contains_key(&txid) {
            txid = txid.wrapping_add(1);
        }
        txid
    }

    pub fn insert(&mut self, lookup: PendingLookup) {
        self.lookups.insert(lookup.txid, lookup);
    }

    pub fn remove(&mut self, txid: u64) -> Option<PendingLookup> {
        self.lookups.remove(&txid)
    }

    pub fn contains(&self, txid: u64) -> bool {
        self.lookups.contains_key(&txid)
    }

    pub fn len(&self) -> usize {
        self.lookups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &PendingLookup> {
        self.lookups.values()
    }

    /// Remove and return every lookup past its deadline
    pub fn drain_expired(&mut self, now: Timestamp) -> Vec<PendingLookup> {
        let expired: Vec<u64> = self
            .lookups
            .values()
            .filter(|l| l.is_timed_out(now))
            .map(|l| l.txid)
            .collect();
        expired
            .into_iter()
            .filter_map(|txid| self.lookups.remove(&txid))
            .collect()
    }
}

/// An in-flight router contact lookup
#[derive(Debug, Clone, Copy)]
pub struct RouterLookupJob {
    pub started: Timestamp,
}

impl RouterLookupJob {
    pub fn new(now: Timestamp) -> Self {
        Self { started: now }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now.millis_since(self.started) >= ROUTER_LOOKUP_TIMEOUT
    }
}

/// Continuously-refreshed result set for one prefetched tag
#[derive(Debug)]
pub struct CachedTagResult {
    pub tag: TopicTag,
    result: BTreeMap<Address, IntroSet>,
    last_request: Timestamp,
    last_modified: Timestamp,
}

impl CachedTagResult {
    pub fn new(tag: TopicTag) -> Self {
        Self {
            tag,
            result: BTreeMap::new(),
            last_request: Timestamp::ZERO,
            last_modified: Timestamp::ZERO,
        }
    }

    pub fn intro_sets(&self) -> impl Iterator<Item = &IntroSet> {
        self.result.values()
    }

    pub fn len(&self) -> usize {
        self.result.len()
    }

    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }

    /// Fold lookup results into the cache
    pub fn handle_response(&mut self, intro_sets: &[IntroSet], now: Timestamp) {
        for intro_set in intro_sets {
            let addr = intro_set.service.address();
            let newer = match self.result.get(&addr) {
                Some(existing) => intro_set.is_newer_than(existing),
                None => true,
            };
            if newer {
                self.result.insert(addr, intro_set.clone());
                self.last_modified = now;
            }
        }
        info!(tag = %self.tag, cached = self.result.len(), "tag lookup results folded");
    }

    /// Drop entries whose introductions have expired
    pub fn expire(&mut self, now: Timestamp) {
        let before = self.result.len();
        self.result
            .retain(|_, intro_set| !intro_set.has_expired_intros(now));
        if self.result.len() != before {
            self.last_modified = now;
        }
    }

    pub fn should_refresh(&self, now: Timestamp) -> bool {
        now.millis_since(self.last_request) >= TAG_REFRESH_INTERVAL
    }

    /// The refresh envelope; stamps the request time
    pub fn build_request(&mut self, txid: u64, now: Timestamp) -> DhtMessage {
        self.last_request = now;
        DhtMessage::FindIntro {
            target: FindIntroTarget::Tag(self.tag),
            txid,
            relay_order: LOOKUP_RELAY_ORDER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ServiceIdentity;
    use crate::service::Introduction;
    use veilnet_common::{PathId, RouterId};

    fn signed_intro_set(expiry: u64) -> IntroSet {
        let identity = ServiceIdentity::generate().unwrap();
        let mut set = IntroSet::new(identity.service_info(), identity.pq_public().clone());
        set.intros.push(Introduction::new(
            RouterId::from([1u8; 32]),
            PathId::random(),
            Timestamp::from_millis(expiry),
        ));
        set.sign(&identity, Timestamp::from_millis(1));
        set
    }

    #[test]
    fn test_txids_are_unique_across_live_entries() {
        let mut table = PendingLookupTable::new();
        for _ in 0..64 {
            let txid = table.gen_txid();
            assert!(!table.contains(txid));
            table.insert(PendingLookup {
                txid,
                name: "test",
                started: Timestamp::ZERO,
                deadline: Timestamp::from_millis(10_000),
                kind: LookupKind::Tag {
                    tag: TopicTag::new("t"),
                },
            });
        }
        assert_eq!(table.len(), 64);
    }

    #[test]
    fn test_drain_expired_removes_exactly_the_stale() {
        let mut table = PendingLookupTable::new();
        table.insert(PendingLookup {
            txid: 1,
            name: "old",
            started: Timestamp::ZERO,
            deadline: Timestamp::from_millis(5_000),
            kind: LookupKind::Tag {
                tag: TopicTag::new("a"),
            },
        });
        table.insert(PendingLookup {
            txid: 2,
            name: "fresh",
            started: Timestamp::ZERO,
            deadline: Timestamp::from_millis(50_000),
            kind: LookupKind::Tag {
                tag: TopicTag::new("b"),
            },
        });

        let expired = table.drain_expired(Timestamp::from_millis(6_000));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].txid, 1);
        assert!(table.contains(2));
        assert!(!table.contains(1));
    }

    #[test]
    fn test_cached_tag_result_lifecycle() {
        let mut cache = CachedTagResult::new(TopicTag::new("market"));
        assert!(cache.should_refresh(Timestamp::from_millis(1)));

        let fresh = signed_intro_set(100_000);
        let dying = signed_intro_set(2_000);
        cache.handle_response(&[fresh.clone(), dying], Timestamp::from_millis(1_000));
        assert_eq!(cache.len(), 2);

        cache.expire(Timestamp::from_millis(3_000));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.intro_sets().next().unwrap().service.address(),
            fresh.service.address()
        );
    }

    #[test]
    fn test_tag_refresh_is_rate_limited() {
        let mut cache = CachedTagResult::new(TopicTag::new("market"));
        let now = Timestamp::from_millis(10_000);
        let _ = cache.build_request(9, now);
        assert!(!cache.should_refresh(now + 1_000));
        assert!(cache.should_refresh(now + TAG_REFRESH_INTERVAL));
    }

    #[test]
    fn test_router_lookup_job_expiry() {
        let job = RouterLookupJob::new(Timestamp::from_millis(1_000));
        assert!(!job.is_expired(Timestamp::from_millis(2_000)));
        assert!(job.is_expired(Timestamp::from_millis(1_000 + ROUTER_LOOKUP_TIMEOUT)));
    }

    #[test]
    fn test_build_request_kinds() {
        let hs = PendingLookup {
            txid: 5,
            name: "HSLookup",
            started: Timestamp::ZERO,
            deadline: Timestamp::from_millis(10_000),
            kind: LookupKind::HiddenService {
                remote: Address::from_bytes([4u8; 32]),
                purpose: LookupPurpose::NewSession,
            },
        };
        match hs.build_request() {
            DhtMessage::FindIntro {
                target: FindIntroTarget::Address(addr),
                txid,
                relay_order,
            } => {
                assert_eq!(addr, Address::from_bytes([4u8; 32]));
                assert_eq!(txid, 5);
                assert_eq!(relay_order, LOOKUP_RELAY_ORDER);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }
}
