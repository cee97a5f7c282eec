//! End-to-end endpoint flows over a capturing fake link layer:
//! cold descriptor publish, lookup timeout and duplicate handling,
//! introduction refresh, and a full two-endpoint conversation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use veilnet_common::config::timing::LOOKUP_TIMEOUT;
use veilnet_common::{PathId, Result, RouterId, Timestamp, VeilnetError};
use veilnet_core::path::{Path, PathInfo, PathSet};
use veilnet_core::protocol::{DhtMessage, FindIntroTarget, ProtocolType, RoutingMessage};
use veilnet_core::runtime::CryptoWorker;
use veilnet_core::service::PathEnsureHook;
use veilnet_core::{Address, Endpoint, MemNodeDb, RouterContext, RoutingLink};

/// Link layer double: records everything, optionally refuses sends
struct TestLink {
    sent: Mutex<Vec<(RouterId, PathId, RoutingMessage)>>,
    fail: AtomicBool,
}

impl TestLink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn take(&self) -> Vec<(RouterId, PathId, RoutingMessage)> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl RoutingLink for TestLink {
    fn send_routing_message(
        &self,
        upstream: RouterId,
        path: PathId,
        message: RoutingMessage,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VeilnetError::network("test link down"));
        }
        self.sent.lock().unwrap().push((upstream, path, message));
        Ok(())
    }
}

fn test_context(link: &Arc<TestLink>) -> RouterContext {
    RouterContext::new(
        Arc::new(MemNodeDb::new()),
        link.clone(),
        CryptoWorker::inline(),
    )
}

fn started_endpoint(name: &str) -> Endpoint {
    let mut endpoint = Endpoint::new(name);
    endpoint.start().expect("start");
    endpoint
}

/// Add an established path through `first..last` to a pool
fn establish_path(set: &mut PathSet, first: u8, last: u8, now: Timestamp) -> PathInfo {
    let path = Path::new(
        vec![
            RouterId::from([first; 32]),
            RouterId::from([first.wrapping_add(100); 32]),
            RouterId::from([first.wrapping_add(150); 32]),
            RouterId::from([last; 32]),
        ],
        PathId::random(),
        now,
    )
    .unwrap();
    let info = path.info();
    set.add_path(path).unwrap();
    set.handle_path_built(&info, now).unwrap();
    info
}

fn find_publish(messages: &[(RouterId, PathId, RoutingMessage)]) -> Option<u64> {
    messages.iter().find_map(|(_, _, msg)| match msg {
        RoutingMessage::Dht(inner) => inner.iter().find_map(|m| match m {
            DhtMessage::PublishIntro { txid, .. } => Some(*txid),
            _ => None,
        }),
        _ => None,
    })
}

fn find_address_lookup(messages: &[(RouterId, PathId, RoutingMessage)]) -> Option<(u64, Address)> {
    messages.iter().find_map(|(_, _, msg)| match msg {
        RoutingMessage::Dht(inner) => inner.iter().find_map(|m| match m {
            DhtMessage::FindIntro {
                target: FindIntroTarget::Address(addr),
                txid,
                ..
            } => Some((*txid, *addr)),
            _ => None,
        }),
        _ => None,
    })
}

fn counting_hook(calls: &Arc<Mutex<Vec<Option<Address>>>>) -> PathEnsureHook {
    let calls = calls.clone();
    Box::new(move |_endpoint, _rcx, resolved, _now| {
        calls.lock().unwrap().push(resolved);
    })
}

#[test]
fn cold_publish_confirms_and_clears_txid() {
    let link = TestLink::new();
    let rcx = test_context(&link);
    let mut endpoint = started_endpoint("publisher");
    // past the publish interval, as real wall-clock epoch times are
    let mut now = Timestamp::from_millis(3_600_000);

    // no paths yet: the tick must not publish, it must ask for builds
    endpoint.tick(now, &rcx);
    assert_eq!(find_publish(&link.take()), None);
    assert!(endpoint.path_set().pending_build_count() > 0);
    assert_eq!(endpoint.path_set().current_publish_tx(), 0);

    // a path establishes; the publish goes out with a fresh txid
    establish_path(endpoint.path_set_mut(), 1, 9, now);
    now += 1_000;
    endpoint.tick(now, &rcx);

    let sent = link.take();
    let txid = find_publish(&sent).expect("publish sent");
    assert_ne!(txid, 0);
    assert_eq!(endpoint.path_set().current_publish_tx(), txid);
    assert!(!endpoint.intro_set().unwrap().intros.is_empty());

    // while in flight, further ticks stay quiet
    now += 1_000;
    endpoint.tick(now, &rcx);
    assert_eq!(find_publish(&link.take()), None);

    // a matching confirmation closes the transaction
    let confirmation = endpoint.intro_set().unwrap().clone();
    assert!(endpoint.handle_got_intro(txid, &[confirmation], now, &rcx));
    assert_eq!(endpoint.path_set().current_publish_tx(), 0);
    assert_eq!(endpoint.path_set().last_publish(), now);
}

#[test]
fn bad_signature_on_confirmation_is_publish_failure() {
    let link = TestLink::new();
    let rcx = test_context(&link);
    let mut endpoint = started_endpoint("publisher");
    let now = Timestamp::from_millis(3_600_000);

    establish_path(endpoint.path_set_mut(), 1, 9, now);
    endpoint.tick(now, &rcx);
    let txid = find_publish(&link.take()).expect("publish sent");
    let attempt_at = endpoint.path_set().last_publish_attempt();

    let mut forged = endpoint.intro_set().unwrap().clone();
    forged.signature.0[0] ^= 0xff;

    assert!(!endpoint.handle_got_intro(txid, &[forged], now, &rcx));
    // txid cleared, lastPublish untouched, attempt time preserved
    assert_eq!(endpoint.path_set().current_publish_tx(), 0);
    assert_eq!(endpoint.path_set().last_publish(), Timestamp::ZERO);
    assert_eq!(endpoint.path_set().last_publish_attempt(), attempt_at);

    // the cleared transaction lets the next tick try again
    endpoint.tick(now + 1_000, &rcx);
    assert!(find_publish(&link.take()).is_some());
}

#[test]
fn lookup_timeout_fires_hook_once_with_none() {
    let link = TestLink::new();
    let rcx = test_context(&link);
    let mut endpoint = started_endpoint("seeker");
    let now = Timestamp::from_millis(10_000);
    establish_path(endpoint.path_set_mut(), 1, 9, now);

    let remote = Address::from_bytes([0xaa; 32]);
    let calls = Arc::new(Mutex::new(Vec::new()));

    assert!(endpoint.ensure_path_to_service(remote, counting_hook(&calls), LOOKUP_TIMEOUT, now, &rcx));
    assert!(endpoint.has_pending_path_to_service(&remote));
    assert_eq!(endpoint.pending_lookup_count(), 1);

    // before the deadline nothing fires
    endpoint.tick(now + LOOKUP_TIMEOUT - 1, &rcx);
    assert!(calls.lock().unwrap().is_empty());

    // at the deadline the hook observes the timeout exactly once
    endpoint.tick(now + LOOKUP_TIMEOUT, &rcx);
    assert_eq!(calls.lock().unwrap().as_slice(), &[None]);
    assert!(!endpoint.has_pending_path_to_service(&remote));
    assert_eq!(endpoint.pending_lookup_count(), 0);
}

#[test]
fn duplicate_lookup_is_rejected_and_first_hook_wins() {
    let link = TestLink::new();
    let rcx = test_context(&link);
    let mut alice = started_endpoint("alice");
    let bob = started_endpoint("bob");
    let now = Timestamp::from_millis(10_000);
    establish_path(alice.path_set_mut(), 1, 9, now);

    // a published descriptor for bob with one live introduction
    let mut bob_set = bob.intro_set().unwrap().clone();
    bob_set.intros.push(veilnet_core::Introduction::new(
        RouterId::from([7u8; 32]),
        PathId::random(),
        now + 60_000,
    ));
    bob_set.sign(bob.identity().unwrap(), now);
    let bob_addr = bob_set.service.address();

    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));

    assert!(alice.ensure_path_to_service(bob_addr, counting_hook(&first), LOOKUP_TIMEOUT, now, &rcx));
    assert!(!alice.ensure_path_to_service(bob_addr, counting_hook(&second), LOOKUP_TIMEOUT, now, &rcx));

    let (txid, looked_up) = find_address_lookup(&link.take()).expect("lookup sent");
    assert_eq!(looked_up, bob_addr);

    assert!(alice.handle_got_intro(txid, &[bob_set], now, &rcx));

    assert_eq!(first.lock().unwrap().as_slice(), &[Some(bob_addr)]);
    assert!(second.lock().unwrap().is_empty());
    assert!(alice.has_path_to_service(&bob_addr));
    assert!(!alice.has_pending_path_to_service(&bob_addr));
}

#[test]
fn near_expiry_tick_refreshes_and_reselects_introduction() {
    let link = TestLink::new();
    let rcx = test_context(&link);
    let mut alice = started_endpoint("alice");
    let bob = started_endpoint("bob");
    let now = Timestamp::from_millis(10_000);
    establish_path(alice.path_set_mut(), 1, 9, now);

    let short = veilnet_core::Introduction::new(RouterId::from([2u8; 32]), PathId::random(), now + 10_000);
    let long = veilnet_core::Introduction::new(RouterId::from([3u8; 32]), PathId::random(), now + 40_000);
    let mut bob_set = bob.intro_set().unwrap().clone();
    bob_set.intros = vec![short, long];
    bob_set.sign(bob.identity().unwrap(), now);
    let bob_addr = bob_set.service.address();

    alice.put_new_outbound_context(bob_set.clone(), now, &rcx);
    assert_eq!(
        alice.remote_session(&bob_addr).unwrap().selected_intro().unwrap().router,
        RouterId::from([3u8; 32])
    );
    link.take();

    // within 30s of the selected intro's expiry the context asks for a
    // refresh
    let later = now + 35_000;
    alice.tick(later, &rcx);
    let (txid, looked_up) = find_address_lookup(&link.take()).expect("refresh lookup sent");
    assert_eq!(looked_up, bob_addr);

    // a strictly newer descriptor replaces the set and the selection moves
    // to the freshest introduction
    let fresh = veilnet_core::Introduction::new(RouterId::from([5u8; 32]), PathId::random(), later + 90_000);
    let mut newer = bob_set.clone();
    newer.intros = vec![fresh];
    newer.sign(bob.identity().unwrap(), later);

    assert!(alice.handle_got_intro(txid, &[newer], later, &rcx));
    assert_eq!(
        alice.remote_session(&bob_addr).unwrap().selected_intro().unwrap().router,
        RouterId::from([5u8; 32])
    );
}

#[test]
fn stale_intro_set_update_is_ignored() {
    let link = TestLink::new();
    let rcx = test_context(&link);
    let mut alice = started_endpoint("alice");
    let bob = started_endpoint("bob");
    let now = Timestamp::from_millis(10_000);
    establish_path(alice.path_set_mut(), 1, 9, now);

    let mut current = bob.intro_set().unwrap().clone();
    current.intros = vec![veilnet_core::Introduction::new(
        RouterId::from([3u8; 32]),
        PathId::random(),
        now + 40_000,
    )];
    current.sign(bob.identity().unwrap(), now);
    let bob_addr = current.service.address();
    alice.put_new_outbound_context(current.clone(), now, &rcx);

    let mut stale = current.clone();
    stale.intros = vec![veilnet_core::Introduction::new(
        RouterId::from([4u8; 32]),
        PathId::random(),
        now + 90_000,
    )];
    stale.sign(
        bob.identity().unwrap(),
        Timestamp::from_millis(now.as_millis() - 5_000),
    );

    let ctx = alice.remote_session_mut(&bob_addr).unwrap();
    ctx.on_intro_set_update(&stale, now);
    assert_eq!(ctx.current_intro_set().signed_at, current.signed_at);
    assert_eq!(
        ctx.selected_intro().unwrap().router,
        RouterId::from([3u8; 32])
    );
}

#[test]
fn full_conversation_between_two_endpoints() {
    let link = TestLink::new();
    let rcx = test_context(&link);
    let mut alice = started_endpoint("alice");
    let mut bob = started_endpoint("bob");
    let mut now = Timestamp::from_millis(10_000);
    establish_path(alice.path_set_mut(), 1, 9, now);

    // bob's descriptor advertises the rendezvous router 7
    let rendezvous = RouterId::from([7u8; 32]);
    let mut bob_set = bob.intro_set().unwrap().clone();
    bob_set.intros = vec![veilnet_core::Introduction::new(
        rendezvous,
        PathId::random(),
        now + 120_000,
    )];
    bob_set.sign(bob.identity().unwrap(), now);
    let bob_addr = bob_set.service.address();

    alice.put_new_outbound_context(bob_set, now, &rcx);

    // the subordinate pool aligns a path terminating at the rendezvous
    {
        let ctx = alice.remote_session_mut(&bob_addr).unwrap();
        let requests = ctx.paths_mut().take_build_requests();
        assert!(!requests.is_empty());
        assert!(requests.iter().all(|r| r.terminal == Some(rendezvous)));

        let path = Path::new(
            vec![
                RouterId::from([21u8; 32]),
                RouterId::from([22u8; 32]),
                RouterId::from([23u8; 32]),
                rendezvous,
            ],
            PathId::random(),
            now,
        )
        .unwrap();
        let info = path.info();
        ctx.paths_mut().add_path(path).unwrap();
        ctx.handle_path_built(&info, now);
    }
    link.take();

    // first send runs the handshake off-thread and flushes the first frame
    now += 100;
    alice
        .send_to(&rcx, bob_addr, ProtocolType::Text, b"BEEP".to_vec(), now)
        .unwrap();
    alice.pump(now, &rcx);

    assert_eq!(alice.remote_session(&bob_addr).unwrap().sequence_no(), 1);
    let sent = link.take();
    let frame = sent
        .iter()
        .find_map(|(_, _, msg)| match msg {
            RoutingMessage::PathTransfer(transfer) => Some(transfer.frame.clone()),
            _ => None,
        })
        .expect("first frame sent");
    assert!(frame.is_handshake());
    assert_eq!(frame.sequence, 0);

    // bob receives the frame, decapsulates and surfaces the payload
    now += 100;
    bob.handle_hidden_service_frame(frame, &rcx).unwrap();
    bob.pump(now, &rcx);

    let received = bob.poll_inbound().expect("inbound payload");
    assert_eq!(received.payload, b"BEEP");
    assert_eq!(received.sender, alice.identity().unwrap().service_info());

    // both sides now hold the same session key
    let tag = received.tag;
    let alice_key = alice.sessions().get_cached_session_key_for(&tag).unwrap();
    let bob_key = bob.sessions().get_cached_session_key_for(&tag).unwrap();
    assert_eq!(alice_key, bob_key);

    // the second send skips the handshake and rides the cached key
    now += 100;
    alice
        .send_to(&rcx, bob_addr, ProtocolType::Traffic, b"hello bob".to_vec(), now)
        .unwrap();
    let sent = link.take();
    let frame = sent
        .iter()
        .find_map(|(_, _, msg)| match msg {
            RoutingMessage::PathTransfer(transfer) => Some(transfer.frame.clone()),
            _ => None,
        })
        .expect("data frame sent");
    assert!(!frame.is_handshake());
    assert!(frame.sequence > 0);

    now += 100;
    let replay = frame.clone();
    bob.handle_hidden_service_frame(frame, &rcx).unwrap();
    bob.pump(now, &rcx);
    assert_eq!(bob.poll_inbound().expect("data payload").payload, b"hello bob");

    // replaying the same frame is rejected by the sliding window
    bob.handle_hidden_service_frame(replay, &rcx).unwrap();
    bob.pump(now, &rcx);
    assert!(bob.poll_inbound().is_none());
}

#[test]
fn duplicated_handshake_frame_is_delivered_once() {
    let link = TestLink::new();
    let rcx = test_context(&link);
    let mut alice = started_endpoint("alice");
    let mut bob = started_endpoint("bob");
    let now = Timestamp::from_millis(10_000);
    establish_path(alice.path_set_mut(), 1, 9, now);

    let rendezvous = RouterId::from([7u8; 32]);
    let mut bob_set = bob.intro_set().unwrap().clone();
    bob_set.intros = vec![veilnet_core::Introduction::new(
        rendezvous,
        PathId::random(),
        now + 120_000,
    )];
    bob_set.sign(bob.identity().unwrap(), now);
    let bob_addr = bob_set.service.address();

    alice.put_new_outbound_context(bob_set, now, &rcx);
    {
        let ctx = alice.remote_session_mut(&bob_addr).unwrap();
        let path = Path::new(
            vec![
                RouterId::from([21u8; 32]),
                RouterId::from([22u8; 32]),
                RouterId::from([23u8; 32]),
                rendezvous,
            ],
            PathId::random(),
            now,
        )
        .unwrap();
        let info = path.info();
        ctx.paths_mut().add_path(path).unwrap();
        ctx.handle_path_built(&info, now);
    }
    link.take();

    alice
        .send_to(&rcx, bob_addr, ProtocolType::Text, b"BEEP".to_vec(), now)
        .unwrap();
    alice.pump(now, &rcx);
    let frame = link
        .take()
        .iter()
        .find_map(|(_, _, msg)| match msg {
            RoutingMessage::PathTransfer(transfer) => Some(transfer.frame.clone()),
            _ => None,
        })
        .expect("first frame sent");
    assert!(frame.is_handshake());

    // the relay duplicates the frame; both copies land in the same tick,
    // before either is processed
    bob.handle_hidden_service_frame(frame.clone(), &rcx).unwrap();
    bob.handle_hidden_service_frame(frame, &rcx).unwrap();
    bob.pump(now, &rcx);

    let first = bob.poll_inbound().expect("handshake payload");
    assert_eq!(first.payload, b"BEEP");
    assert!(bob.poll_inbound().is_none());
}

#[test]
fn ensure_path_fails_without_established_paths() {
    let link = TestLink::new();
    let rcx = test_context(&link);
    let mut endpoint = started_endpoint("pathless");
    let calls = Arc::new(Mutex::new(Vec::new()));

    assert!(!endpoint.ensure_path_to_service(
        Address::from_bytes([0xbb; 32]),
        counting_hook(&calls),
        LOOKUP_TIMEOUT,
        Timestamp::from_millis(1_000),
        &rcx,
    ));
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(link.sent_count(), 0);
}

#[test]
fn failed_send_registers_nothing() {
    let link = TestLink::new();
    let rcx = test_context(&link);
    let mut endpoint = started_endpoint("unlucky");
    let now = Timestamp::from_millis(1_000);
    establish_path(endpoint.path_set_mut(), 1, 9, now);

    link.fail.store(true, Ordering::SeqCst);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let remote = Address::from_bytes([0xcc; 32]);

    assert!(!endpoint.ensure_path_to_service(remote, counting_hook(&calls), LOOKUP_TIMEOUT, now, &rcx));
    assert!(!endpoint.has_pending_path_to_service(&remote));
    assert_eq!(endpoint.pending_lookup_count(), 0);
}
