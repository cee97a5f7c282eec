/// The client-side hidden service layer
///
/// Owns the identity, the descriptor publish state machine, the pending
/// lookup tables, the prefetch loops, the conversation cache and every
/// outbound session. All mutation happens on the endpoint logic side;
/// worker completions re-enter through the event queue drained by
/// [`Endpoint::pump`].
use super::lookup::{
    CachedTagResult, LookupKind, LookupPurpose, PendingLookup, PendingLookupTable, RouterLookupJob,
};
use super::outbound::{ContextTick, OutboundContext};
use super::session::SessionMap;
use super::{Address, ConvoTag, IntroSet, ServiceInfo, TopicTag};
use crate::handshake;
use crate::identity::ServiceIdentity;
use crate::path::PathSet;
use crate::protocol::{DhtMessage, ProtocolFrame, ProtocolMessage, ProtocolType, RoutingMessage};
use crate::router::RouterContext;
use crate::runtime::{event_channel, EndpointEvent, EventQueue, EventSink};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use veilnet_common::config::routing::{DEFAULT_NUM_HOPS, DEFAULT_NUM_PATHS};
use veilnet_common::config::timing::LOOKUP_TIMEOUT;
use veilnet_common::{Result, RouterContact, RouterId, Timestamp, VeilnetError};

/// Invoked when a requested path alignment resolves (`Some`) or times out
/// (`None`)
pub type PathEnsureHook =
    Box<dyn FnOnce(&mut Endpoint, &RouterContext, Option<Address>, Timestamp) + Send>;

/// Deferred work queued by configuration, drained during `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitTask {
    IsolateNetwork,
}

/// Counters surfaced for operability
#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointStats {
    pub prefetch_addr_parse_failures: u64,
    pub unknown_option_keys: u64,
}

/// A decrypted application payload handed up to the owner
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub tag: ConvoTag,
    pub protocol: ProtocolType,
    pub sender: ServiceInfo,
    pub payload: Vec<u8>,
}

pub struct Endpoint {
    name: String,
    keyfile: Option<PathBuf>,
    topic: TopicTag,
    netns: Option<String>,
    isolated: bool,
    on_init: VecDeque<InitTask>,

    identity: Option<ServiceIdentity>,
    intro_set: Option<IntroSet>,

    prefetch_tags: HashSet<TopicTag>,
    prefetch_addrs: HashSet<Address>,
    prefetched_tags: HashMap<TopicTag, CachedTagResult>,

    paths: PathSet,
    pending_lookups: PendingLookupTable,
    pending_routers: HashMap<RouterId, RouterLookupJob>,
    pending_service_lookups: HashMap<Address, PathEnsureHook>,
    remote_sessions: HashMap<Address, OutboundContext>,
    sessions: SessionMap,

    inbound: VecDeque<InboundMessage>,
    events_tx: EventSink,
    events_rx: EventQueue,
    stats: EndpointStats,
}

impl Endpoint {
    pub fn new(name: impl Into<String>) -> Self {
        let (events_tx, events_rx) = event_channel();
        Self {
            name: name.into(),
            keyfile: None,
            topic: TopicTag::EMPTY,
            netns: None,
            isolated: false,
            on_init: VecDeque::new(),
            identity: None,
            intro_set: None,
            prefetch_tags: HashSet::new(),
            prefetch_addrs: HashSet::new(),
            prefetched_tags: HashMap::new(),
            paths: PathSet::new(DEFAULT_NUM_PATHS, DEFAULT_NUM_HOPS),
            pending_lookups: PendingLookupTable::new(),
            pending_routers: HashMap::new(),
            pending_service_lookups: HashMap::new(),
            remote_sessions: HashMap::new(),
            sessions: SessionMap::new(),
            inbound: VecDeque::new(),
            events_tx,
            events_rx,
            stats: EndpointStats::default(),
        }
    }

    /// Apply one configuration option. Unknown keys are accepted (and
    /// counted); a malformed prefetch address is skipped (and counted).
    pub fn set_option(&mut self, key: &str, value: &str) -> bool {
        match key {
            "keyfile" => {
                self.keyfile = Some(PathBuf::from(value));
            }
            "tag" => {
                self.topic = TopicTag::new(value);
                info!(name = %self.name, tag = value, "setting tag");
            }
            "prefetch-tag" => {
                self.prefetch_tags.insert(TopicTag::new(value));
            }
            "prefetch-addr" => match value.parse::<Address>() {
                Ok(addr) => {
                    self.prefetch_addrs.insert(addr);
                }
                Err(_) => {
                    self.stats.prefetch_addr_parse_failures += 1;
                }
            },
            "netns" => {
                self.netns = Some(value.to_string());
                self.on_init.push_back(InitTask::IsolateNetwork);
            }
            _ => {
                self.stats.unknown_option_keys += 1;
            }
        }
        true
    }

    /// Load or generate the identity, then drain the deferred initializers.
    /// Any initializer failure aborts the start.
    pub fn start(&mut self) -> Result<()> {
        let identity = match &self.keyfile {
            Some(path) => ServiceIdentity::ensure_keys(path)
                .map_err(|e| VeilnetError::Identity(e.to_string()))?,
            None => ServiceIdentity::generate()
                .map_err(|e| VeilnetError::Identity(e.to_string()))?,
        };
        self.intro_set = Some(IntroSet::new(
            identity.service_info(),
            identity.pq_public().clone(),
        ));
        self.identity = Some(identity);

        while let Some(task) = self.on_init.pop_front() {
            match task {
                InitTask::IsolateNetwork => self.isolate_network()?,
            }
        }
        Ok(())
    }

    fn isolate_network(&mut self) -> Result<()> {
        // actual namespace attachment belongs to the owning router; the
        // endpoint only records that its logic must run isolated
        self.isolated = true;
        info!(name = %self.name, netns = ?self.netns, "endpoint isolated");
        Ok(())
    }

    pub fn name(&self) -> String {
        match &self.identity {
            Some(identity) => format!("{}:{}", self.name, identity.service_info().address()),
            None => self.name.clone(),
        }
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn stats(&self) -> EndpointStats {
        self.stats
    }

    pub fn address(&self) -> Option<Address> {
        self.identity.as_ref().map(|i| i.service_info().address())
    }

    pub fn identity(&self) -> Option<&ServiceIdentity> {
        self.identity.as_ref()
    }

    pub fn intro_set(&self) -> Option<&IntroSet> {
        self.intro_set.as_ref()
    }

    pub fn path_set(&self) -> &PathSet {
        &self.paths
    }

    pub fn path_set_mut(&mut self) -> &mut PathSet {
        &mut self.paths
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SessionMap {
        &mut self.sessions
    }

    pub fn remote_session(&self, addr: &Address) -> Option<&OutboundContext> {
        self.remote_sessions.get(addr)
    }

    pub fn remote_session_mut(&mut self, addr: &Address) -> Option<&mut OutboundContext> {
        self.remote_sessions.get_mut(addr)
    }

    pub fn has_path_to_service(&self, addr: &Address) -> bool {
        self.remote_sessions.contains_key(addr)
    }

    pub fn has_pending_path_to_service(&self, addr: &Address) -> bool {
        self.pending_service_lookups.contains_key(addr)
    }

    pub fn pending_lookup_count(&self) -> usize {
        self.pending_lookups.len()
    }

    pub fn pending_router_count(&self) -> usize {
        self.pending_routers.len()
    }

    pub fn gen_txid(&self) -> u64 {
        self.pending_lookups.gen_txid()
    }

    /// Pop the next decrypted inbound payload
    pub fn poll_inbound(&mut self) -> Option<InboundMessage> {
        self.inbound.pop_front()
    }

    /// Periodic upkeep, invoked by the owning router on a fixed cadence
    pub fn tick(&mut self, now: Timestamp, rcx: &RouterContext) {
        self.pump(now, rcx);

        // permit a publish retry once the last attempt has aged out
        self.paths.reset_stale_publish_tx(now);

        // publish descriptors
        if self.should_publish(now) && !self.publish_descriptors(now, rcx) {
            return;
        }

        // expire pending lookups; handlers observe the empty result set
        for lookup in self.pending_lookups.drain_expired(now) {
            info!(name = %self.name(), lookup = lookup.name, txid = lookup.txid, "lookup timed out");
            self.handle_lookup_response(lookup, &[], now, rcx);
        }

        // expire pending router lookups
        self.pending_routers.retain(|router, job| {
            let expired = job.is_expired(now);
            if expired {
                info!(%router, "router lookup timed out");
            }
            !expired
        });

        self.tick_prefetch_addrs(now, rcx);
        self.tick_prefetch_tags(now, rcx);
        self.tick_sessions(now, rcx);

        self.paths.tick(now);
    }

    fn should_publish(&self, now: Timestamp) -> bool {
        match &self.intro_set {
            Some(intro_set) => self.paths.should_publish_descriptors(now, intro_set),
            None => false,
        }
    }

    /// Returns false when the caller should stop this tick (no
    /// introductions to advertise yet).
    fn publish_descriptors(&mut self, now: Timestamp, rcx: &RouterContext) -> bool {
        let identity = match &self.identity {
            Some(identity) => identity.clone(),
            None => return true,
        };

        let mut intros = Vec::new();
        if !self.paths.get_current_introductions(&mut intros) {
            warn!(
                name = %self.name(),
                "could not publish descriptors, no introductions"
            );
            if self.paths.should_build_more() {
                self.paths.manual_rebuild(1);
            }
            return false;
        }

        let Some(intro_set) = self.intro_set.as_mut() else {
            return true;
        };
        intro_set.intros = intros;
        intro_set.topic = self.topic;
        intro_set.sign(&identity, now);

        let target = identity.service_info().address().to_router();
        let intro_set = intro_set.clone();
        match self
            .paths
            .publish_intro_set(&intro_set, target, rcx.link.as_ref(), now)
        {
            Ok(()) => info!(name = %self.name(), "publishing introset"),
            Err(err) => warn!(name = %self.name(), %err, "failed to publish introset"),
        }
        true
    }

    fn tick_prefetch_addrs(&mut self, now: Timestamp, rcx: &RouterContext) {
        let wanted: Vec<Address> = self
            .prefetch_addrs
            .iter()
            .copied()
            .filter(|addr| !self.has_path_to_service(addr))
            .collect();
        for addr in wanted {
            if !self.ensure_path_to_service(addr, Self::beep_hook(), LOOKUP_TIMEOUT, now, rcx) {
                warn!(name = %self.name(), %addr, "failed to ensure path");
            }
        }
    }

    fn tick_prefetch_tags(&mut self, now: Timestamp, rcx: &RouterContext) {
        let tags: Vec<TopicTag> = self.prefetch_tags.iter().copied().collect();
        for tag in tags {
            self.prefetched_tags
                .entry(tag)
                .or_insert_with(|| CachedTagResult::new(tag));

            let candidates: Vec<Address> = self
                .prefetched_tags
                .get(&tag)
                .map(|entry| {
                    entry
                        .intro_sets()
                        .map(|set| set.service.address())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
                .into_iter()
                .filter(|addr| !self.has_pending_path_to_service(addr))
                .collect();
            for addr in candidates {
                if !self.ensure_path_to_service(addr, Self::beep_hook(), LOOKUP_TIMEOUT, now, rcx) {
                    warn!(name = %self.name(), %addr, tag = %tag, "failed to ensure path for tag");
                }
            }

            let refresh = match self.prefetched_tags.get_mut(&tag) {
                Some(entry) => {
                    entry.expire(now);
                    entry.should_refresh(now)
                }
                None => false,
            };
            if refresh {
                self.refresh_tag(tag, now, rcx);
            }
        }
    }

    fn refresh_tag(&mut self, tag: TopicTag, now: Timestamp, rcx: &RouterContext) {
        let (upstream, rx_id) = match self.paths.pick_random_established_path() {
            Some(path) => (path.upstream(), path.rx_id()),
            None => return,
        };
        let txid = self.pending_lookups.gen_txid();
        let request = match self.prefetched_tags.get_mut(&tag) {
            Some(entry) => entry.build_request(txid, now),
            None => return,
        };

        match rcx
            .link
            .send_routing_message(upstream, rx_id, RoutingMessage::Dht(vec![request]))
        {
            Ok(()) => self.pending_lookups.insert(PendingLookup {
                txid,
                name: "TagLookup",
                started: now,
                deadline: now + LOOKUP_TIMEOUT,
                kind: LookupKind::Tag { tag },
            }),
            Err(err) => warn!(name = %self.name(), %err, "tag lookup send failed"),
        }
    }

    fn tick_sessions(&mut self, now: Timestamp, rcx: &RouterContext) {
        let mut outcomes: Vec<(Address, ContextTick)> = Vec::new();
        for (addr, ctx) in self.remote_sessions.iter_mut() {
            outcomes.push((*addr, ctx.tick(now)));
        }
        for (addr, outcome) in outcomes {
            if outcome.done {
                info!(name = %self.name(), %addr, "dropping outbound session");
                self.remote_sessions.remove(&addr);
                continue;
            }
            if outcome.want_intro_set_update {
                self.update_intro_set(addr, now, rcx);
            }
            if let Some(router) = outcome.ensure_router {
                self.ensure_router_is_known(router, now, rcx);
            }
        }
    }

    /// The prefetch liveness hook: first traffic forces the handshake
    fn beep_hook() -> PathEnsureHook {
        Box::new(|endpoint, rcx, resolved, now| match resolved {
            Some(addr) => {
                if let Err(err) =
                    endpoint.send_to(rcx, addr, ProtocolType::Text, b"BEEP".to_vec(), now)
                {
                    warn!(%addr, %err, "prefetch liveness send failed");
                }
            }
            None => warn!("path align timed out"),
        })
    }

    /// Encrypt-and-send application bytes to an aligned remote
    pub fn send_to(
        &mut self,
        rcx: &RouterContext,
        addr: Address,
        protocol: ProtocolType,
        payload: Vec<u8>,
        now: Timestamp,
    ) -> Result<()> {
        let identity = self
            .identity
            .clone()
            .ok_or_else(|| VeilnetError::Identity("endpoint not started".to_string()))?;
        let ctx = self
            .remote_sessions
            .get_mut(&addr)
            .ok_or(VeilnetError::NoSession)?;
        ctx.async_encrypt_and_send_to(
            &identity,
            &mut self.sessions,
            rcx,
            &self.events_tx,
            protocol,
            payload,
            now,
        )
    }

    /// Resolve `remote` and align a path to one of its introductions.
    /// `hook` fires exactly once: with the address on success, with `None`
    /// on lookup timeout. A second request while one is in flight fails.
    pub fn ensure_path_to_service(
        &mut self,
        remote: Address,
        hook: PathEnsureHook,
        timeout_millis: u64,
        now: Timestamp,
        rcx: &RouterContext,
    ) -> bool {
        let path = match self.paths.established_closest_to(remote.to_router()) {
            Some(path) => (path.upstream(), path.rx_id()),
            None => {
                warn!(name = %self.name(), "no outbound path for lookup yet");
                return false;
            }
        };

        if self.remote_sessions.contains_key(&remote) {
            hook(self, rcx, Some(remote), now);
            return true;
        }
        if self.pending_service_lookups.contains_key(&remote) {
            warn!(name = %self.name(), %remote, "duplicate pending service lookup");
            return false;
        }

        let txid = self.pending_lookups.gen_txid();
        let lookup = PendingLookup {
            txid,
            name: "HSLookup",
            started: now,
            deadline: now + timeout_millis,
            kind: LookupKind::HiddenService {
                remote,
                purpose: LookupPurpose::NewSession,
            },
        };
        let request = lookup.build_request();
        match rcx
            .link
            .send_routing_message(path.0, path.1, RoutingMessage::Dht(vec![request]))
        {
            Ok(()) => {
                self.pending_service_lookups.insert(remote, hook);
                self.pending_lookups.insert(lookup);
                info!(name = %self.name(), %remote, "ensure path to service");
                true
            }
            Err(err) => {
                error!(name = %self.name(), %err, "send via path failed");
                false
            }
        }
    }

    /// Issue a fresh descriptor lookup for an existing outbound session
    fn update_intro_set(&mut self, remote: Address, now: Timestamp, rcx: &RouterContext) {
        // one refresh in flight per remote is enough
        let already = self.pending_lookups.values().any(|l| {
            matches!(
                l.kind,
                LookupKind::HiddenService {
                    remote: r,
                    purpose: LookupPurpose::IntroSetUpdate,
                } if r == remote
            )
        });
        if already {
            return;
        }

        let path = match self.paths.established_closest_to(remote.to_router()) {
            Some(path) => (path.upstream(), path.rx_id()),
            None => {
                warn!(name = %self.name(), %remote, "cannot update introset, no path");
                return;
            }
        };
        let txid = self.pending_lookups.gen_txid();
        let lookup = PendingLookup {
            txid,
            name: "HSUpdate",
            started: now,
            deadline: now + LOOKUP_TIMEOUT,
            kind: LookupKind::HiddenService {
                remote,
                purpose: LookupPurpose::IntroSetUpdate,
            },
        };
        let request = lookup.build_request();
        match rcx
            .link
            .send_routing_message(path.0, path.1, RoutingMessage::Dht(vec![request]))
        {
            Ok(()) => self.pending_lookups.insert(lookup),
            Err(err) => error!(name = %self.name(), %err, "introset update send failed"),
        }
    }

    /// Make sure `router`'s contact record is known, looking it up over the
    /// closest established path if not
    pub fn ensure_router_is_known(&mut self, router: RouterId, now: Timestamp, rcx: &RouterContext) {
        if router.is_zero() {
            return;
        }
        if rcx.nodedb.get_rc(&router).is_some() {
            return;
        }
        if self.pending_routers.contains_key(&router) {
            return;
        }
        let path = match self.paths.established_closest_to(router) {
            Some(path) => (path.upstream(), path.rx_id()),
            None => {
                error!(name = %self.name(), %router, "no path for router lookup");
                return;
            }
        };
        let txid = self.pending_lookups.gen_txid();
        let message = RoutingMessage::Dht(vec![DhtMessage::FindRouter { key: router, txid }]);
        match rcx.link.send_routing_message(path.0, path.1, message) {
            Ok(()) => {
                info!(name = %self.name(), %router, "looking up router");
                self.pending_routers.insert(router, RouterLookupJob::new(now));
            }
            Err(err) => error!(name = %self.name(), %err, "router lookup send failed"),
        }
    }

    /// A DHT intro response arrived for us
    ///
    /// Either a confirmation of our own publish, or the result set of a
    /// pending lookup. Every descriptor is signature-checked before any
    /// routing decision uses it.
    pub fn handle_got_intro(
        &mut self,
        txid: u64,
        intro_sets: &[IntroSet],
        now: Timestamp,
        rcx: &RouterContext,
    ) -> bool {
        let own = self.identity.as_ref().map(|i| i.service_info());
        let mut remote = Vec::new();

        for intro_set in intro_sets {
            let ours = own.map(|info| info == intro_set.service).unwrap_or(false);
            if !intro_set.verify() {
                info!(name = %self.name(), "invalid introset signature");
                if ours && self.paths.current_publish_tx() == txid {
                    self.paths.intro_set_publish_fail();
                }
                return false;
            }
            if ours && self.paths.current_publish_tx() == txid {
                info!(name = %self.name(), "introset publish confirmed");
                self.paths.intro_set_published(now);
                return true;
            }
            remote.push(intro_set.clone());
        }

        let lookup = match self.pending_lookups.remove(txid) {
            Some(lookup) => lookup,
            None => {
                warn!(name = %self.name(), txid, "invalid lookup response");
                return true;
            }
        };
        self.handle_lookup_response(lookup, &remote, now, rcx);
        true
    }

    /// Dispatch a resolved (or timed-out: empty `results`) lookup
    fn handle_lookup_response(
        &mut self,
        lookup: PendingLookup,
        results: &[IntroSet],
        now: Timestamp,
        rcx: &RouterContext,
    ) {
        match lookup.kind {
            LookupKind::HiddenService {
                remote,
                purpose: LookupPurpose::NewSession,
            } => {
                if results.len() == 1 {
                    info!(name = %self.name(), %remote, "hidden service lookup success");
                    self.put_new_outbound_context(results[0].clone(), now, rcx);
                } else {
                    info!(name = %self.name(), %remote, "no response in hidden service lookup");
                    if let Some(hook) = self.pending_service_lookups.remove(&remote) {
                        hook(self, rcx, None, now);
                    }
                }
            }
            LookupKind::HiddenService {
                remote,
                purpose: LookupPurpose::IntroSetUpdate,
            } => {
                if let Some(first) = results.first() {
                    let ensure = self
                        .remote_sessions
                        .get_mut(&remote)
                        .and_then(|ctx| ctx.on_intro_set_update(first, now));
                    if let Some(router) = ensure {
                        self.ensure_router_is_known(router, now, rcx);
                    }
                }
            }
            LookupKind::Tag { tag } => {
                if let Some(entry) = self.prefetched_tags.get_mut(&tag) {
                    entry.handle_response(results, now);
                }
            }
        }
    }

    /// Create the per-remote session for a freshly resolved descriptor,
    /// then fire the waiting alignment hook. Idempotent per address.
    pub fn put_new_outbound_context(
        &mut self,
        intro_set: IntroSet,
        now: Timestamp,
        rcx: &RouterContext,
    ) {
        let addr = intro_set.service.address();

        if !self.remote_sessions.contains_key(&addr) {
            let ctx = OutboundContext::new(intro_set, now);
            let ensure = ctx.selected_intro().map(|intro| intro.router);
            self.remote_sessions.insert(addr, ctx);
            info!(name = %self.name(), %addr, "created new outbound context");
            if let Some(router) = ensure {
                self.ensure_router_is_known(router, now, rcx);
            }
        }

        if let Some(hook) = self.pending_service_lookups.remove(&addr) {
            hook(self, rcx, Some(addr), now);
        }
    }

    /// A router lookup response arrived: exactly one contact is accepted
    /// and handed to the node db
    pub fn handle_got_router(&mut self, contacts: &[RouterContact], rcx: &RouterContext) -> bool {
        if contacts.len() != 1 {
            return false;
        }
        let rc = &contacts[0];
        if self.pending_routers.remove(&rc.router_id).is_none() {
            return false;
        }
        rcx.nodedb.put_rc(rc.clone());
        true
    }

    /// An encrypted frame arrived on one of our paths. Decryption and
    /// verification run on the worker; the completion re-enters via `pump`.
    pub fn handle_hidden_service_frame(
        &mut self,
        frame: ProtocolFrame,
        rcx: &RouterContext,
    ) -> Result<()> {
        let identity = self
            .identity
            .clone()
            .ok_or_else(|| VeilnetError::Identity("endpoint not started".to_string()))?;
        let known_key = self.sessions.get_cached_session_key_for(&frame.tag);

        rcx.worker.submit(&self.events_tx, move || {
            if let Some(key) = known_key {
                match frame.decrypt_and_verify(&key) {
                    Ok(message) => EndpointEvent::InboundReady {
                        message,
                        sequence: frame.sequence,
                        fresh_key: None,
                    },
                    Err(err) => EndpointEvent::InboundFailed {
                        reason: err.to_string(),
                    },
                }
            } else if frame.is_handshake() {
                match handshake::recv_intro(&frame, &identity) {
                    Ok(inbound) => EndpointEvent::InboundReady {
                        message: inbound.message,
                        sequence: frame.sequence,
                        fresh_key: Some(inbound.shared_key),
                    },
                    Err(err) => EndpointEvent::InboundFailed {
                        reason: err.to_string(),
                    },
                }
            } else {
                EndpointEvent::InboundFailed {
                    reason: "unknown tag without handshake ciphertext".to_string(),
                }
            }
        });
        Ok(())
    }

    /// Drain worker completions into endpoint state
    pub fn pump(&mut self, now: Timestamp, rcx: &RouterContext) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event, now, rcx);
        }
    }

    fn handle_event(&mut self, event: EndpointEvent, now: Timestamp, rcx: &RouterContext) {
        match event {
            EndpointEvent::IntroReady { remote, result } => {
                // the context may have drained while the worker ran
                if !self.remote_sessions.contains_key(&remote) {
                    debug!(%remote, "discarding handshake for drained context");
                    return;
                }
                self.sessions
                    .put_cached_session_key_for(result.tag, result.shared_key, now);
                self.sessions.put_intro_for(result.tag, result.intro_reply, now);
                self.sessions.put_sender_for(result.tag, result.remote, now);

                if let Some(ctx) = self.remote_sessions.get_mut(&remote) {
                    ctx.handshake_completed(now);
                    if let Err(err) = ctx.send(result.frame, rcx, now) {
                        warn!(%remote, %err, "first frame send failed");
                    }
                }
            }
            EndpointEvent::IntroFailed { remote, reason } => {
                error!(%remote, %reason, "handshake generation failed");
                if let Some(ctx) = self.remote_sessions.get_mut(&remote) {
                    ctx.handshake_failed();
                }
            }
            EndpointEvent::InboundReady {
                message,
                sequence,
                fresh_key,
            } => self.handle_inbound(message, sequence, fresh_key, now),
            EndpointEvent::InboundFailed { reason } => {
                warn!(name = %self.name(), %reason, "dropping inbound frame");
            }
        }
    }

    fn handle_inbound(
        &mut self,
        message: ProtocolMessage,
        sequence: u64,
        fresh_key: Option<crate::crypto::SharedKey>,
        now: Timestamp,
    ) {
        let tag = message.tag;
        match fresh_key {
            Some(key) => {
                // receiver side of a handshake; a duplicated first frame
                // decapsulates fine on the worker, so the replay check here
                // is whether the conversation is already installed
                if self.sessions.contains(&tag) {
                    debug!(%tag, "duplicate handshake frame");
                    return;
                }
                self.sessions.put_cached_session_key_for(tag, key, now);
                self.sessions.put_sender_for(tag, message.sender, now);
                self.sessions.put_intro_for(tag, message.intro_reply, now);
            }
            None => {
                if !self.sessions.accept_seqno(&tag, sequence, now) {
                    debug!(%tag, sequence, "replayed or stale frame");
                    return;
                }
            }
        }

        let sender_addr = message.sender.address();
        if let Some(ctx) = self.remote_sessions.get_mut(&sender_addr) {
            ctx.record_traffic(now);
        }

        self.inbound.push_back(InboundMessage {
            tag,
            protocol: message.protocol,
            sender: message.sender,
            payload: message.payload,
        });
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("address", &self.address())
            .field("sessions", &self.remote_sessions.len())
            .field("pending_lookups", &self.pending_lookups.len())
            .finish()
    }
}
