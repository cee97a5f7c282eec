/// Conversation-tag keyed session cache
///
/// One entry per live conversation: the remote's identity, their reply
/// introduction, the derived session key, the send sequence counter and a
/// receive-side replay window. Entries are filled in piecemeal as the
/// handshake completes on either side.
use super::{ConvoTag, Introduction, ServiceInfo};
use crate::crypto::SharedKey;
use std::collections::HashMap;
use veilnet_common::config::session::{MAX_SESSIONS, REPLAY_WINDOW};
use veilnet_common::Timestamp;

/// Sliding-window replay filter over received sequence numbers
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    highest: u64,
    mask: u64,
}

impl ReplayWindow {
    /// Accept a sequence number exactly once; stale or duplicate numbers
    /// outside the window are rejected
    pub fn accept(&mut self, seq: u64) -> bool {
        if seq == 0 {
            return false;
        }
        if seq > self.highest {
            let shift = seq - self.highest;
            if shift >= 64 {
                self.mask = 0;
            } else {
                self.mask <<= shift;
            }
            self.mask |= 1;
            self.highest = seq;
            return true;
        }
        let delta = self.highest - seq;
        if delta >= REPLAY_WINDOW {
            return false;
        }
        let bit = 1u64 << delta;
        if self.mask & bit != 0 {
            return false;
        }
        self.mask |= bit;
        true
    }
}

/// One cached conversation
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Who is on the other end
    pub remote: Option<ServiceInfo>,

    /// Their reply addressing
    pub intro: Option<Introduction>,

    /// Derived hybrid session key; absent until a handshake completes
    pub shared_key: Option<SharedKey>,

    /// Send-side sequence counter; 0 means nothing sent yet
    pub seqno: u64,

    /// Receive-side replay filter
    pub replay: ReplayWindow,

    pub last_used: Timestamp,
}

/// The endpoint's conversation cache, keyed by [`ConvoTag`]
#[derive(Debug, Default)]
pub struct SessionMap {
    sessions: HashMap<ConvoTag, Session>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, tag: &ConvoTag) -> bool {
        self.sessions.contains_key(tag)
    }

    pub fn put_sender_for(&mut self, tag: ConvoTag, info: ServiceInfo, now: Timestamp) {
        let session = self.entry(tag, now);
        session.remote = Some(info);
        session.last_used = now;
    }

    pub fn get_sender_for(&self, tag: &ConvoTag) -> Option<ServiceInfo> {
        self.sessions.get(tag).and_then(|s| s.remote)
    }

    pub fn put_intro_for(&mut self, tag: ConvoTag, intro: Introduction, now: Timestamp) {
        let session = self.entry(tag, now);
        session.intro = Some(intro);
        session.last_used = now;
    }

    pub fn get_intro_for(&self, tag: &ConvoTag) -> Option<Introduction> {
        self.sessions.get(tag).and_then(|s| s.intro)
    }

    pub fn put_cached_session_key_for(&mut self, tag: ConvoTag, key: SharedKey, now: Timestamp) {
        let session = self.entry(tag, now);
        session.shared_key = Some(key);
        session.last_used = now;
    }

    pub fn get_cached_session_key_for(&self, tag: &ConvoTag) -> Option<SharedKey> {
        self.sessions.get(tag).and_then(|s| s.shared_key)
    }

    /// All conversation tags currently open with `info`
    pub fn convo_tags_for_service(&self, info: &ServiceInfo) -> Vec<ConvoTag> {
        let mut tags: Vec<ConvoTag> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.remote.as_ref() == Some(info))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort();
        tags
    }

    /// Pre-increment and return the send sequence number for `tag`.
    /// Returns 0 when the conversation is unknown.
    pub fn next_seqno_for_convo(&mut self, tag: &ConvoTag) -> u64 {
        match self.sessions.get_mut(tag) {
            Some(session) => {
                session.seqno += 1;
                session.seqno
            }
            None => 0,
        }
    }

    /// Receive-side replay check for `tag`
    pub fn accept_seqno(&mut self, tag: &ConvoTag, seq: u64, now: Timestamp) -> bool {
        match self.sessions.get_mut(tag) {
            Some(session) => {
                session.last_used = now;
                session.replay.accept(seq)
            }
            None => false,
        }
    }

    fn entry(&mut self, tag: ConvoTag, now: Timestamp) -> &mut Session {
        if !self.sessions.contains_key(&tag) && self.sessions.len() >= MAX_SESSIONS {
            self.evict_oldest();
        }
        self.sessions.entry(tag).or_insert_with(|| Session {
            last_used: now,
            ..Session::default()
        })
    }

    fn evict_oldest(&mut self) {
        if let Some(tag) = self
            .sessions
            .iter()
            .min_by_key(|(_, session)| session.last_used)
            .map(|(tag, _)| *tag)
        {
            self.sessions.remove(&tag);
        }
    }
}
