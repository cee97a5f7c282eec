/// Per-remote path-alignment state machine
///
/// Owns the remote's verified intro set, the currently selected
/// introduction, and a subordinate path pool whose terminal hop is pinned to
/// that introduction's router. Mutual references with the endpoint are
/// avoided by indirection: the endpoint drives this context and acts on the
/// follow-ups its calls report.
use super::session::SessionMap;
use super::{Address, Introduction, IntroSet};
use crate::handshake::IntroParams;
use crate::identity::ServiceIdentity;
use crate::path::{PathInfo, PathSet};
use crate::protocol::{PathTransferMessage, ProtocolFrame, ProtocolMessage, ProtocolType, RoutingMessage};
use crate::router::RouterContext;
use crate::runtime::{EndpointEvent, EventSink};
use tracing::{debug, error, info, warn};
use veilnet_common::config::routing::{ALIGN_REBUILD_PATHS, DEFAULT_NUM_HOPS};
use veilnet_common::config::timing::{INTRO_REFRESH_THRESHOLD, SESSION_KEEP_ALIVE};
use veilnet_common::{Result, RouterId, Timestamp, VeilnetError};

/// Alignment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    NoIntroSelected,
    IntroSelectedBuilding,
    Ready,
    HandshakeInFlight,
    Established,
    Draining,
}

/// Follow-ups the endpoint performs after ticking a context
#[derive(Debug, Default)]
pub struct ContextTick {
    /// Drop the context
    pub done: bool,

    /// Issue a fresh intro set lookup for the remote
    pub want_intro_set_update: bool,

    /// Make sure this router's contact is known locally
    pub ensure_router: Option<RouterId>,
}

pub struct OutboundContext {
    remote_addr: Address,
    current_intro_set: IntroSet,
    selected_intro: Option<Introduction>,
    sequence_no: u64,
    state: ContextState,
    paths: PathSet,
    last_traffic: Timestamp,
    needs_refresh: bool,
    name: String,
}

impl OutboundContext {
    pub fn new(intro_set: IntroSet, now: Timestamp) -> Self {
        let remote_addr = intro_set.service.address();
        let mut ctx = Self {
            remote_addr,
            current_intro_set: intro_set,
            selected_intro: None,
            sequence_no: 0,
            state: ContextState::NoIntroSelected,
            paths: PathSet::new(ALIGN_REBUILD_PATHS, DEFAULT_NUM_HOPS),
            last_traffic: now,
            needs_refresh: false,
            name: format!("OBContext:{}", remote_addr),
        };
        ctx.shift_introduction(now);
        ctx
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remote_addr(&self) -> Address {
        self.remote_addr
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn current_intro_set(&self) -> &IntroSet {
        &self.current_intro_set
    }

    pub fn selected_intro(&self) -> Option<&Introduction> {
        self.selected_intro.as_ref()
    }

    pub fn sequence_no(&self) -> u64 {
        self.sequence_no
    }

    pub fn paths(&self) -> &PathSet {
        &self.paths
    }

    pub fn paths_mut(&mut self) -> &mut PathSet {
        &mut self.paths
    }

    /// Re-select the introduction with the most remaining lifetime and
    /// rebuild the subordinate pool toward its router.
    /// Returns the router whose contact must be known for the build.
    pub fn shift_introduction(&mut self, _now: Timestamp) -> Option<RouterId> {
        let best = self
            .current_intro_set
            .intros
            .iter()
            .max_by_key(|intro| (intro.expires_at, intro.path_id))
            .copied()?;

        self.selected_intro = Some(best);
        self.paths.align_to(best.router);
        self.paths.manual_rebuild(ALIGN_REBUILD_PATHS);
        if self.state == ContextState::NoIntroSelected {
            self.state = ContextState::IntroSelectedBuilding;
        }
        debug!(name = %self.name, router = %best.router, "shifted introduction");
        Some(best.router)
    }

    /// Monotone intro set refresh; only strictly newer sets are accepted.
    /// Returns a router to ensure-known when the selection moved.
    pub fn on_intro_set_update(&mut self, intro_set: &IntroSet, now: Timestamp) -> Option<RouterId> {
        if !intro_set.is_newer_than(&self.current_intro_set) {
            return None;
        }
        self.current_intro_set = intro_set.clone();
        self.needs_refresh = false;

        let selected_still_valid = self
            .selected_intro
            .map(|sel| self.current_intro_set.intros.contains(&sel))
            .unwrap_or(false);
        if selected_still_valid {
            None
        } else {
            self.shift_introduction(now)
        }
    }

    /// A subordinate path finished building
    pub fn handle_path_built(&mut self, info: &PathInfo, now: Timestamp) {
        if self.paths.handle_path_built(info, now).is_err() {
            return;
        }
        let aligned = match (&self.selected_intro, self.paths.get_by_upstream(&info.upstream, &info.rx_id)) {
            (Some(sel), Some(path)) => path.endpoint() == sel.router,
            _ => false,
        };
        if aligned && self.state == ContextState::IntroSelectedBuilding {
            self.state = ContextState::Ready;
            info!(name = %self.name, "aligned path ready");
        }
    }

    /// First-frame handshake finished on the worker
    pub fn handshake_completed(&mut self, now: Timestamp) {
        self.sequence_no = 1;
        self.state = ContextState::Established;
        self.last_traffic = now;
    }

    /// The handshake job failed; the next send may start a fresh one
    pub fn handshake_failed(&mut self) {
        if self.state == ContextState::HandshakeInFlight {
            self.state = ContextState::Ready;
        }
    }

    /// Inbound traffic for this remote keeps the session alive
    pub fn record_traffic(&mut self, now: Timestamp) {
        self.last_traffic = now;
    }

    /// Encrypt and send application bytes, running the handshake first if
    /// this conversation has none yet
    #[allow(clippy::too_many_arguments)]
    pub fn async_encrypt_and_send_to(
        &mut self,
        identity: &ServiceIdentity,
        sessions: &mut SessionMap,
        rcx: &RouterContext,
        events: &EventSink,
        protocol: ProtocolType,
        payload: Vec<u8>,
        now: Timestamp,
    ) -> Result<()> {
        let selected = self
            .selected_intro
            .ok_or_else(|| VeilnetError::internal("no introduction selected"))?;
        let path = self
            .paths
            .get_path_by_router(&selected.router)
            .ok_or(VeilnetError::NoPath)?;

        if self.sequence_no == 0 {
            let params = IntroParams {
                identity: identity.clone(),
                remote: self.current_intro_set.service,
                remote_pq: self.current_intro_set.pq_key.clone(),
                intro_reply: *path.intro(),
                protocol,
                payload,
            };
            let remote = self.remote_addr;
            self.state = ContextState::HandshakeInFlight;
            rcx.worker.submit(events, move || match crate::handshake::gen_intro(params) {
                Ok(result) => EndpointEvent::IntroReady { remote, result },
                Err(err) => EndpointEvent::IntroFailed {
                    remote,
                    reason: err.to_string(),
                },
            });
            Ok(())
        } else {
            self.encrypt_and_send_to(identity, sessions, rcx, protocol, payload, now)
        }
    }

    /// Direct encrypt under the cached session key
    fn encrypt_and_send_to(
        &mut self,
        identity: &ServiceIdentity,
        sessions: &mut SessionMap,
        rcx: &RouterContext,
        protocol: ProtocolType,
        payload: Vec<u8>,
        now: Timestamp,
    ) -> Result<()> {
        let selected = self
            .selected_intro
            .ok_or_else(|| VeilnetError::internal("no introduction selected"))?;
        let path = self
            .paths
            .get_path_by_router(&selected.router)
            .ok_or(VeilnetError::NoPath)?;

        let tags = sessions.convo_tags_for_service(&self.current_intro_set.service);
        let tag = *tags.first().ok_or(VeilnetError::NoSession)?;
        let shared = sessions
            .get_cached_session_key_for(&tag)
            .ok_or(VeilnetError::NoSession)?;
        let sequence = sessions.next_seqno_for_convo(&tag);

        let message = ProtocolMessage {
            protocol,
            tag,
            sender: identity.service_info(),
            intro_reply: *path.intro(),
            payload,
        };
        let frame = ProtocolFrame::encrypt_and_sign(
            &message,
            crate::crypto::random_nonce(),
            Vec::new(),
            sequence,
            &shared,
            identity,
        )
        .map_err(|e| VeilnetError::crypto(e.to_string()))?;

        let transfer = PathTransferMessage::new(frame, selected.path_id);
        path.send_routing_message(rcx.link.as_ref(), RoutingMessage::PathTransfer(transfer))?;

        self.sequence_no += 1;
        self.last_traffic = now;
        Ok(())
    }

    /// Send an already-encrypted frame (the handshake's first frame)
    pub fn send(&mut self, frame: ProtocolFrame, rcx: &RouterContext, now: Timestamp) -> Result<()> {
        if self.current_intro_set.has_expired_intros(now) {
            self.needs_refresh = true;
        }
        if let Some(sel) = self.selected_intro {
            if sel.is_expired(now) {
                self.shift_introduction(now);
            }
        }
        let selected = self
            .selected_intro
            .ok_or_else(|| VeilnetError::internal("no introduction selected"))?;
        let path = match self.paths.get_path_by_router(&selected.router) {
            Some(path) => path,
            None => {
                warn!(name = %self.name, router = %selected.router, "no path to introduction");
                return Err(VeilnetError::NoPath);
            }
        };

        let transfer = PathTransferMessage::new(frame, selected.path_id);
        if let Err(err) =
            path.send_routing_message(rcx.link.as_ref(), RoutingMessage::PathTransfer(transfer))
        {
            error!(name = %self.name, %err, "failed to send frame on path");
            return Err(err);
        }
        self.last_traffic = now;
        Ok(())
    }

    /// Periodic upkeep. `done` in the result means the context should be
    /// dropped by its owner.
    pub fn tick(&mut self, now: Timestamp) -> ContextTick {
        let mut result = ContextTick::default();

        // dead session: every advertised introduction expired and nothing
        // has flowed within the keep-alive window
        if self.current_intro_set.all_intros_expired(now)
            && now.millis_since(self.last_traffic) >= SESSION_KEEP_ALIVE
        {
            self.state = ContextState::Draining;
            result.done = true;
            return result;
        }

        if let Some(sel) = self.selected_intro {
            if sel.expires_at <= now || sel.expires_at.millis_since(now) < INTRO_REFRESH_THRESHOLD {
                result.want_intro_set_update = true;
            }
            if sel.is_expired(now) {
                self.shift_introduction(now);
            }
            result.ensure_router = self.selected_intro.map(|s| s.router);
        }
        if self.needs_refresh {
            result.want_intro_set_update = true;
        }

        self.paths.tick(now);
        result
    }
}

impl std::fmt::Debug for OutboundContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundContext")
            .field("remote", &self.remote_addr)
            .field("state", &self.state)
            .field("sequence_no", &self.sequence_no)
            .finish()
    }
}
