/// A pool of paths owned by one entity
///
/// Drives build/established/timeout/expired lifecycles, exposes the pool as
/// a selection primitive for DHT queries, and gates descriptor publishing.
use super::builder::BuildRequest;
use super::{Path, PathInfo, PathStatus};
use crate::protocol::{DhtMessage, RoutingMessage};
use crate::router::RoutingLink;
use crate::service::{Introduction, IntroSet};
use rand::Rng;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use veilnet_common::config::dht::PUBLISH_RELAY_ORDER;
use veilnet_common::config::timing::{
    INTROSET_PUBLISH_INTERVAL, INTROSET_PUBLISH_RETRY_INTERVAL, PATH_BUILD_TIMEOUT, PATH_LIFETIME,
};
use veilnet_common::{PathId, Result, RouterId, Timestamp, VeilnetError};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathSetError {
    #[error("duplicate path for upstream {upstream} rx {rx_id}")]
    DuplicatePath { upstream: RouterId, rx_id: PathId },

    #[error("no such path")]
    NoSuchPath,
}

/// Ordered pool of paths plus descriptor-publish bookkeeping
#[derive(Debug)]
pub struct PathSet {
    /// Target number of live paths
    num_paths: usize,

    /// Hops per path handed to the builder
    num_hops: usize,

    paths: BTreeMap<PathInfo, Path>,

    /// Forced terminal hop for rebuilt paths, set while aligned to an
    /// introduction
    aligned_to: Option<RouterId>,

    /// Queued builds awaiting the external builder
    pending_builds: Vec<BuildRequest>,

    /// Outstanding publish transaction; 0 means none in flight
    current_publish_tx: u64,

    last_publish: Timestamp,
    last_publish_attempt: Timestamp,
}

impl PathSet {
    pub fn new(num_paths: usize, num_hops: usize) -> Self {
        Self {
            num_paths,
            num_hops,
            paths: BTreeMap::new(),
            aligned_to: None,
            pending_builds: Vec::new(),
            current_publish_tx: 0,
            last_publish: Timestamp::ZERO,
            last_publish_attempt: Timestamp::ZERO,
        }
    }

    pub fn num_hops(&self) -> usize {
        self.num_hops
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Pin rebuilt paths' terminal hop to `router`
    pub fn align_to(&mut self, router: RouterId) {
        self.aligned_to = Some(router);
    }

    pub fn add_path(&mut self, path: Path) -> std::result::Result<(), PathSetError> {
        let info = path.info();
        if self.paths.contains_key(&info) {
            return Err(PathSetError::DuplicatePath {
                upstream: info.upstream,
                rx_id: info.rx_id,
            });
        }
        self.paths.insert(info, path);
        Ok(())
    }

    pub fn remove_path(&mut self, info: &PathInfo) -> std::result::Result<(), PathSetError> {
        self.paths
            .remove(info)
            .map(|_| ())
            .ok_or(PathSetError::NoSuchPath)
    }

    /// Builder callback: the path finished its hop handshakes
    pub fn handle_path_built(
        &mut self,
        info: &PathInfo,
        now: Timestamp,
    ) -> std::result::Result<(), PathSetError> {
        let path = self.paths.get_mut(info).ok_or(PathSetError::NoSuchPath)?;
        path.mark_established(now);
        debug!(upstream = %info.upstream, "path established");
        Ok(())
    }

    pub fn get_by_upstream(&self, router: &RouterId, rx_id: &PathId) -> Option<&Path> {
        self.paths.get(&PathInfo {
            upstream: *router,
            rx_id: *rx_id,
        })
    }

    /// Drive lifetime transitions
    pub fn expire_paths(&mut self, now: Timestamp) {
        for path in self.paths.values_mut() {
            match path.status {
                PathStatus::Established => {
                    if let Some(built) = path.established_at {
                        if built + PATH_LIFETIME <= now {
                            path.status = PathStatus::Expired;
                        }
                    }
                }
                PathStatus::Building => {
                    if path.build_started + PATH_BUILD_TIMEOUT <= now {
                        path.status = PathStatus::Timeout;
                    }
                }
                _ => {}
            }
        }
    }

    pub fn num_in_status(&self, status: PathStatus) -> usize {
        self.paths.values().filter(|p| p.status == status).count()
    }

    /// True iff the pool is below its target of live paths
    pub fn should_build_more(&self) -> bool {
        self.num_in_status(PathStatus::Established) + self.num_in_status(PathStatus::Building)
            < self.num_paths
    }

    /// Collect the introductions our established paths expose.
    /// Returns true iff `out` gained at least one entry.
    pub fn get_current_introductions(&self, out: &mut Vec<Introduction>) -> bool {
        let before = out.len();
        for path in self.paths.values() {
            if path.is_established() {
                out.push(*path.intro());
            }
        }
        out.len() > before
    }

    /// Uniform selection over established paths
    pub fn pick_random_established_path(&self) -> Option<&Path> {
        let established: Vec<&Path> =
            self.paths.values().filter(|p| p.is_established()).collect();
        if established.is_empty() {
            return None;
        }
        let idx = rand::rngs::OsRng.gen_range(0..established.len());
        Some(established[idx])
    }

    /// The established path whose far endpoint is XOR-closest to `target`;
    /// ties broken by the lexicographically lowest endpoint router id
    pub fn established_closest_to(&self, target: RouterId) -> Option<&Path> {
        self.paths
            .values()
            .filter(|p| p.is_established())
            .min_by_key(|p| (p.endpoint().distance(&target), p.endpoint()))
    }

    /// The established path terminating at `router`
    pub fn get_path_by_router(&self, router: &RouterId) -> Option<&Path> {
        self.paths
            .values()
            .find(|p| p.is_established() && p.endpoint() == *router)
    }

    /// Queue `count` builds for the external builder
    pub fn manual_rebuild(&mut self, count: usize) {
        for _ in 0..count {
            self.pending_builds.push(BuildRequest {
                num_hops: self.num_hops,
                terminal: self.aligned_to,
            });
        }
    }

    /// Drain queued builds
    pub fn take_build_requests(&mut self) -> Vec<BuildRequest> {
        std::mem::take(&mut self.pending_builds)
    }

    pub fn pending_build_count(&self) -> usize {
        self.pending_builds.len()
    }

    /// Publish `intro_set` over the established path closest to `target`
    ///
    /// Allocates a fresh nonzero publish transaction id before sending.
    pub fn publish_intro_set(
        &mut self,
        intro_set: &IntroSet,
        target: RouterId,
        link: &dyn RoutingLink,
        now: Timestamp,
    ) -> Result<()> {
        let (upstream, rx_id) = match self.established_closest_to(target) {
            Some(path) => (path.upstream(), path.rx_id()),
            None => {
                warn!("publish introset failed, no path");
                return Err(VeilnetError::NoPath);
            }
        };

        let mut txid = rand::rngs::OsRng.gen::<u64>();
        while txid == 0 {
            txid = rand::rngs::OsRng.gen::<u64>();
        }
        self.current_publish_tx = txid;

        let message = RoutingMessage::Dht(vec![DhtMessage::PublishIntro {
            intro_set: intro_set.clone(),
            txid,
            relay_order: PUBLISH_RELAY_ORDER,
        }]);
        link.send_routing_message(upstream, rx_id, message)?;
        self.last_publish_attempt = now;
        info!(txid, "publishing introset");
        Ok(())
    }

    /// Gate on the publish cadence: retry interval while the published set
    /// has expired intros, the slow interval otherwise; never while a
    /// publish is in flight
    pub fn should_publish_descriptors(&self, now: Timestamp, intro_set: &IntroSet) -> bool {
        if intro_set.has_expired_intros(now) {
            return self.current_publish_tx == 0
                && now.millis_since(self.last_publish_attempt) >= INTROSET_PUBLISH_RETRY_INTERVAL;
        }
        self.current_publish_tx == 0
            && now.millis_since(self.last_publish) >= INTROSET_PUBLISH_INTERVAL
    }

    /// A matching publish confirmation arrived
    pub fn intro_set_published(&mut self, now: Timestamp) {
        self.current_publish_tx = 0;
        self.last_publish = now;
        info!("introset publish confirmed");
    }

    /// The publish was rejected or its confirmation failed verification
    pub fn intro_set_publish_fail(&mut self) {
        warn!("introset publish failed");
        self.current_publish_tx = 0;
    }

    pub fn current_publish_tx(&self) -> u64 {
        self.current_publish_tx
    }

    pub fn last_publish(&self) -> Timestamp {
        self.last_publish
    }

    pub fn last_publish_attempt(&self) -> Timestamp {
        self.last_publish_attempt
    }

    /// Permit a retry once the attempt has aged past the retry interval
    pub fn reset_stale_publish_tx(&mut self, now: Timestamp) {
        if now.millis_since(self.last_publish_attempt) >= INTROSET_PUBLISH_RETRY_INTERVAL {
            self.current_publish_tx = 0;
        }
    }

    /// Drive expiry, reap terminal paths, queue builds to refill the pool
    pub fn tick(&mut self, now: Timestamp) {
        self.expire_paths(now);
        self.paths.retain(|_, path| !path.status.is_terminal());
        if self.should_build_more() {
            self.manual_rebuild(1);
        }
    }
}
