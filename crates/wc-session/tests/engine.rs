//! Engine behaviour against a recording transport.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::*;
use parking_lot::Mutex;
use wc_core::{
    CallError, FullyQualifiedConfig, Message, MessageType, MethodCall, PeerIdentity, PeerMetadata, Response,
    SessionParams,
};
use wc_crypto::SymmetricKey;
use wc_session::{
    JsonPayloadCodec, MemorySessionStore, PayloadCodec, PersistedSessionState, ResponseCallback,
    Session, SessionCallback, SessionError, SessionRole, SessionStatus, SessionStore,
    TransportStatus,
};

const APPROVED: &str = "0xAbC0000000000000000000000000000000000001";

fn transaction(id: u64, from: &str) -> MethodCall {
    MethodCall::SendTransaction {
        id,
        from: from.to_string(),
        to: "0x0000000000000000000000000000000000000002".to_string(),
        nonce: None,
        gas_price: None,
        gas_limit: None,
        value: "0x0".to_string(),
        data: "0x".to_string(),
    }
}

fn raw_inbound(body: &str, key: &SymmetricKey) -> Message {
    let payload = wc_crypto::encrypt(body.as_bytes(), key).unwrap();
    Message::publish(WALLET_ID, serde_json::to_string(&payload).unwrap())
}

#[test]
fn test_account_check_ignores_case() {
    let fx = active_session(&[APPROVED]);
    let mut events = observe(&fx.session);

    let call = transaction(10, &APPROVED.to_lowercase());
    fx.recorder.deliver(fx.inbound(&call, fx.key()));

    assert_eq!(drain(&mut events), vec![Event::Call(call)]);
    assert!(fx.recorder.published().is_empty());
}

#[test]
fn test_unapproved_account_is_answered_not_broadcast() {
    let fx = active_session(&[APPROVED]);
    let mut events = observe(&fx.session);

    let call = MethodCall::PersonalSignMessage {
        id: 11,
        address: "0xdef".to_string(),
        message: "0x68656c6c6f".to_string(),
    };
    fx.recorder.deliver(fx.inbound(&call, fx.key()));

    assert!(drain(&mut events).is_empty());
    let answer = fx.last_published();
    assert_eq!(answer.topic, PEER_ID);
    match decode(&answer, fx.key()) {
        MethodCall::Response(Response { id, result: Err(err) }) => {
            assert_eq!(id, 11);
            assert_eq!(err.code, CallError::INVALID_ACCOUNT_CODE);
        }
        other => panic!("expected error response, got {:?}", other),
    }
}

#[test]
fn test_unmatched_response_is_dropped() {
    let fx = active_session(&[APPROVED]);
    let mut events = observe(&fx.session);

    let response = MethodCall::Response(Response::ok(42, "0xsig"));
    fx.recorder.deliver(fx.inbound(&response, fx.key()));

    assert!(drain(&mut events).is_empty());
    assert!(fx.recorder.published().is_empty());
    assert!(!fx.session.is_closed());
}

#[test]
fn test_response_callback_runs_once() {
    let fx = active_session(&[APPROVED]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let call = MethodCall::Custom {
        id: 500,
        method: "wallet_ping".to_string(),
        params: Vec::new(),
    };
    let callback: ResponseCallback = Box::new(move |response| sink.lock().push(response));
    fx.session.perform_method_call(call.clone(), Some(callback)).unwrap();
    assert_eq!(decode(&fx.last_published(), fx.key()), call);

    let answer = fx.inbound(&MethodCall::Response(Response::ok(500, "pong")), fx.key());
    fx.recorder.deliver(answer.clone());
    fx.recorder.deliver(answer);

    assert_eq!(seen.lock().as_slice(), &[Response::ok(500, "pong")]);
}

#[test]
fn test_malformed_request_gets_invalid_request_answer() {
    let fx = active_session(&[APPROVED]);
    let mut events = observe(&fx.session);

    let body = r#"{"id":77,"jsonrpc":"2.0","method":"eth_sendTransaction","params":[{}]}"#;
    fx.recorder.deliver(raw_inbound(body, fx.key()));

    match decode(&fx.last_published(), fx.key()) {
        MethodCall::Response(Response { id, result: Err(err) }) => {
            assert_eq!(id, 77);
            assert_eq!(err.code, CallError::INVALID_REQUEST_CODE);
        }
        other => panic!("expected error response, got {:?}", other),
    }
    assert!(matches!(
        drain(&mut events).as_slice(),
        [Event::Status(SessionStatus::Error(SessionError::Call(CallError::InvalidRequest { id: 77, .. })))]
    ));
}

#[test]
fn test_foreign_key_payload_reports_authentication_error() {
    let fx = active_session(&[APPROVED]);
    let mut events = observe(&fx.session);

    let call = transaction(12, APPROVED);
    fx.recorder.deliver(fx.inbound(&call, &SymmetricKey::generate()));

    assert_eq!(
        drain(&mut events),
        vec![Event::Status(SessionStatus::Error(SessionError::Authentication))]
    );
    assert!(fx.recorder.published().is_empty());
}

#[test]
fn test_subscribe_envelopes_are_ignored() {
    let fx = active_session(&[APPROVED]);
    let mut events = observe(&fx.session);

    fx.recorder.deliver(Message::subscribe(WALLET_ID));

    assert!(drain(&mut events).is_empty());
}

#[test]
fn test_rejected_session_update_closes() {
    let fx = active_session(&[APPROVED]);
    let mut events = observe(&fx.session);

    let update = MethodCall::SessionUpdate {
        id: 13,
        params: SessionParams::rejected(),
    };
    fx.recorder.deliver(fx.inbound(&update, fx.key()));

    assert_eq!(
        drain(&mut events),
        vec![Event::Call(update), Event::Status(SessionStatus::Closed)]
    );
    assert!(fx.session.is_closed());
    assert!(fx.recorder.is_closed());
    assert_eq!(fx.store.load(&fx.config.handshake_topic).unwrap(), None);
    assert_eq!(fx.session.approved_accounts(), None);
    assert_eq!(fx.session.approve_request(1, "0x"), Err(SessionError::Closed));
}

fn account_update(id: u64, account: &str, chain_id: i64) -> MethodCall {
    MethodCall::SessionUpdate {
        id,
        params: SessionParams {
            approved: true,
            chain_id: Some(chain_id),
            accounts: Some(vec![account.to_string()]),
            peer: None,
        },
    }
}

#[test]
fn test_approved_session_update_replaces_accounts() {
    let fx = restored_session(SessionRole::Offerer, Some(&[APPROVED][..]));
    let mut events = observe(&fx.session);
    let update = account_update(14, "0x0000000000000000000000000000000000000009", 5);

    fx.recorder.deliver(fx.inbound(&update, fx.key()));

    assert_eq!(drain(&mut events), vec![Event::Call(update)]);
    assert_eq!(fx.session.chain_id(), Some(5));
    let saved = fx.store.load(&fx.config.handshake_topic).unwrap().unwrap();
    assert_eq!(saved.chain_id, Some(5));
    assert_eq!(
        saved.approved_accounts,
        Some(vec!["0x0000000000000000000000000000000000000009".to_string()])
    );
}

#[test]
fn test_session_update_before_approval_is_ignored() {
    let fx = fresh_session();
    let mut events = observe(&fx.session);
    let request = MethodCall::SessionRequest {
        id: 40,
        peer: PeerIdentity::new(PEER_ID, Some(PeerMetadata::named("Dapp"))),
    };
    fx.recorder.deliver(fx.inbound(&request, fx.key()));
    drain(&mut events);

    let evil = "0x00000000000000000000000000000000000000ee";
    fx.recorder.deliver(fx.inbound(&account_update(41, evil, 1), fx.key()));

    assert!(drain(&mut events).is_empty());
    assert_eq!(fx.session.approved_accounts(), None);

    // Requests for the injected account are still refused.
    fx.recorder.deliver(fx.inbound(&transaction(42, evil), fx.key()));
    assert!(drain(&mut events).is_empty());
    match decode(&fx.last_published(), fx.key()) {
        MethodCall::Response(Response { id, result: Err(err) }) => {
            assert_eq!(id, 42);
            assert_eq!(err.code, CallError::INVALID_ACCOUNT_CODE);
        }
        other => panic!("expected error response, got {:?}", other),
    }
}

#[test]
fn test_session_update_does_not_override_approver_accounts() {
    let fx = active_session(&[APPROVED]);
    let mut events = observe(&fx.session);

    let update = account_update(43, "0x0000000000000000000000000000000000000009", 5);
    fx.recorder.deliver(fx.inbound(&update, fx.key()));

    assert!(drain(&mut events).is_empty());
    assert_eq!(fx.session.approved_accounts(), Some(vec![APPROVED.to_string()]));
    assert_eq!(fx.session.chain_id(), Some(1));
    let saved = fx.store.load(&fx.config.handshake_topic).unwrap().unwrap();
    assert_eq!(saved.approved_accounts, Some(vec![APPROVED.to_string()]));
}

#[test]
fn test_inbound_key_exchange_switches_key() {
    let fx = active_session(&[APPROVED]);
    let mut events = observe(&fx.session);
    let next_key = SymmetricKey::generate();

    let exchange = MethodCall::ExchangeKey {
        id: 5,
        next_key: next_key.clone(),
        peer: PeerIdentity::new("dapp-peer-2", Some(PeerMetadata::named("Dapp"))),
    };
    fx.recorder.deliver(fx.inbound(&exchange, fx.key()));

    // Acknowledged under the old key, on the new peer topic.
    let ack = fx.last_published();
    assert_eq!(ack.topic, "dapp-peer-2");
    assert_eq!(decode(&ack, fx.key()), MethodCall::Response(Response::ok(5, true)));
    assert_eq!(drain(&mut events), vec![Event::Call(exchange)]);

    fx.session.approve_request(9, "0xsig").unwrap();
    let next = fx.last_published();
    assert_eq!(decode(&next, &next_key), MethodCall::Response(Response::ok(9, "0xsig")));
    assert!(JsonPayloadCodec.parse(&next.payload, fx.key()).is_err());

    let saved = fx.store.load(&fx.config.handshake_topic).unwrap().unwrap();
    assert_eq!(saved.current_key, next_key);
    assert_eq!(saved.peer.map(|p| p.id), Some("dapp-peer-2".to_string()));
}

#[test]
fn test_restore_keeps_stored_client() {
    let fx = active_session(&[APPROVED]);

    let again = Session::new(
        fx.config.clone(),
        codec(),
        fx.store.clone(),
        &Recorder::default(),
        PeerMetadata::named("Other"),
        Some(WALLET_ID.to_string()),
    )
    .unwrap();
    assert_eq!(again.client().id, WALLET_ID);
    assert_eq!(again.peer().map(|p| p.id), Some(PEER_ID.to_string()));
    assert_eq!(again.approved_accounts(), Some(vec![APPROVED.to_string()]));
    assert_eq!(again.handshake_id(), Some(1));

    let mismatch = Session::new(
        fx.config.clone(),
        codec(),
        fx.store.clone(),
        &Recorder::default(),
        PeerMetadata::named("Other"),
        Some("someone-else".to_string()),
    );
    assert!(matches!(
        mismatch,
        Err(SessionError::ClientIdMismatch { ref stored, ref requested })
            if stored == WALLET_ID && requested == "someone-else"
    ));
}

#[test]
fn test_new_session_is_persisted() {
    let fx = fresh_session();

    let saved = fx.store.load(&fx.config.handshake_topic).unwrap().unwrap();
    assert_eq!(saved.client.id, WALLET_ID);
    assert_eq!(saved.current_key, fx.config.key);
    assert_eq!(saved.peer, None);
    assert_eq!(saved.handshake_id, None);
}

#[test]
fn test_approve_without_handshake_is_noop() {
    let fx = fresh_session();
    let mut events = observe(&fx.session);

    fx.session.approve(vec![APPROVED.to_string()], 1).unwrap();

    assert!(fx.recorder.published().is_empty());
    assert!(drain(&mut events).is_empty());
    assert_eq!(fx.session.approved_accounts(), None);
}

#[test]
fn test_send_without_peer_fails() {
    let fx = fresh_session();
    assert_eq!(fx.session.approve_request(1, "0x"), Err(SessionError::NoPeer));
    assert_eq!(fx.session.rotate_key(), Err(SessionError::NoPeer));
}

#[test]
fn test_session_request_records_handshake() {
    let fx = fresh_session();
    let mut events = observe(&fx.session);

    let request = MethodCall::SessionRequest {
        id: 1_700_000_000_000_001,
        peer: PeerIdentity::new(PEER_ID, Some(PeerMetadata::named("Dapp"))),
    };
    fx.recorder.deliver(fx.inbound(&request, fx.key()));
    assert_eq!(drain(&mut events), vec![Event::Call(request)]);
    assert_eq!(fx.session.handshake_id(), Some(1_700_000_000_000_001));
    assert_eq!(fx.session.role(), Some(SessionRole::Approver));
    assert_eq!(fx.session.peer_meta().and_then(|m| m.name), Some("Dapp".to_string()));

    fx.session.approve(vec![APPROVED.to_string()], 1).unwrap();
    let answer = fx.last_published();
    assert_eq!(answer.topic, PEER_ID);
    match decode(&answer, fx.key()) {
        MethodCall::Response(Response { id, result: Ok(value) }) => {
            assert_eq!(id, 1_700_000_000_000_001);
            let params = wc_core::rpc::session_params_from_value(&value).unwrap();
            assert!(params.approved);
            assert_eq!(params.chain_id, Some(1));
            assert_eq!(params.accounts, Some(vec![APPROVED.to_string()]));
            assert_eq!(params.peer.map(|p| p.id), Some(WALLET_ID.to_string()));
        }
        other => panic!("expected approval response, got {:?}", other),
    }
    assert_eq!(drain(&mut events), vec![Event::Status(SessionStatus::Approved)]);
}

#[test]
fn test_reject_answers_and_closes() {
    let fx = fresh_session();
    let request = MethodCall::SessionRequest {
        id: 21,
        peer: PeerIdentity::new(PEER_ID, None),
    };
    fx.recorder.deliver(fx.inbound(&request, fx.key()));

    fx.session.reject().unwrap();

    match decode(&fx.last_published(), fx.key()) {
        MethodCall::Response(Response { id: 21, result: Ok(value) }) => {
            let params = wc_core::rpc::session_params_from_value(&value).unwrap();
            assert!(!params.approved);
        }
        other => panic!("expected rejection response, got {:?}", other),
    }
    assert!(fx.session.is_closed());
    assert_eq!(fx.store.load(&fx.config.handshake_topic).unwrap(), None);
}

#[test]
fn test_kill_notifies_peer_once() {
    let fx = active_session(&[APPROVED]);
    let mut events = observe(&fx.session);

    fx.session.kill().unwrap();
    fx.session.kill().unwrap();

    let published = fx.recorder.published();
    assert_eq!(published.len(), 1);
    match decode(&published[0], fx.key()) {
        MethodCall::SessionUpdate { params, .. } => assert!(!params.approved),
        other => panic!("expected session update, got {:?}", other),
    }
    assert_eq!(drain(&mut events), vec![Event::Status(SessionStatus::Closed)]);
}

#[test]
fn test_kill_without_peer_still_closes() {
    let fx = fresh_session();
    fx.session.kill().unwrap();
    assert!(fx.session.is_closed());
    assert!(fx.recorder.published().is_empty());
}

#[test]
fn test_update_replaces_local_accounts() {
    let fx = active_session(&[APPROVED]);
    let other = "0x0000000000000000000000000000000000000007";

    fx.session.update(vec![other.to_string()], 10).unwrap();

    assert_eq!(fx.session.approved_accounts(), Some(vec![other.to_string()]));
    assert_eq!(fx.session.chain_id(), Some(10));
    match decode(&fx.last_published(), fx.key()) {
        MethodCall::SessionUpdate { params, .. } => {
            assert!(params.approved);
            assert_eq!(params.accounts, Some(vec![other.to_string()]));
        }
        other => panic!("expected session update, got {:?}", other),
    }
}

#[test]
fn test_connected_subscribes_client_topic() {
    let fx = fresh_session();
    let mut events = observe(&fx.session);

    fx.session.init().unwrap();
    fx.recorder.status(TransportStatus::Connected);

    let subs: Vec<String> = fx
        .recorder
        .sent()
        .into_iter()
        .filter(|m| m.kind == MessageType::Sub)
        .map(|m| m.topic)
        .collect();
    assert_eq!(subs, vec![fx.config.handshake_topic.clone(), WALLET_ID.to_string()]);
    assert_eq!(drain(&mut events), vec![Event::Status(SessionStatus::Connected)]);

    // A second init on a live connection does not resubscribe.
    fx.session.init().unwrap();
    assert_eq!(fx.recorder.connects(), 2);
    assert_eq!(fx.recorder.sent().len(), 2);
}

#[test]
fn test_transport_error_is_reported() {
    let fx = fresh_session();
    let mut events = observe(&fx.session);

    fx.recorder.status(TransportStatus::Error("connection refused".to_string()));

    assert_eq!(
        drain(&mut events),
        vec![Event::Status(SessionStatus::Error(SessionError::Transport(
            "connection refused".to_string()
        )))]
    );
}

struct Panicking;

impl SessionCallback for Panicking {
    fn on_method_call(&self, _call: &MethodCall) {
        panic!("observer failure");
    }
}

#[test]
fn test_panicking_observer_does_not_stop_dispatch() {
    let fx = active_session(&[APPROVED]);
    fx.session.add_callback(Arc::new(Panicking));
    let mut events = observe(&fx.session);

    let call = MethodCall::Custom {
        id: 30,
        method: "wallet_ping".to_string(),
        params: Vec::new(),
    };
    fx.recorder.deliver(fx.inbound(&call, fx.key()));

    assert_eq!(drain(&mut events), vec![Event::Call(call)]);
}

#[test]
fn test_removed_observer_is_not_called() {
    let fx = active_session(&[APPROVED]);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let id = fx.session.add_callback(Arc::new(Events::new(tx)));

    assert!(fx.session.remove_callback(id));
    assert!(!fx.session.remove_callback(id));

    let call = MethodCall::Custom {
        id: 31,
        method: "wallet_ping".to_string(),
        params: Vec::new(),
    };
    fx.recorder.deliver(fx.inbound(&call, fx.key()));
    assert!(drain(&mut rx).is_empty());
}

/// Store whose next write blocks until the test releases it.
struct GatedStore {
    inner: MemorySessionStore,
    armed: AtomicBool,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl SessionStore for GatedStore {
    fn load(&self, topic: &str) -> wc_common::Result<Option<PersistedSessionState>> {
        self.inner.load(topic)
    }

    fn store(&self, topic: &str, state: PersistedSessionState) -> wc_common::Result<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv();
        }
        self.inner.store(topic, state)
    }

    fn remove(&self, topic: &str) -> wc_common::Result<()> {
        self.inner.remove(topic)
    }

    fn list(&self) -> wc_common::Result<Vec<PersistedSessionState>> {
        self.inner.list()
    }
}

#[test]
fn test_kill_during_persist_leaves_no_entry() {
    let config = FullyQualifiedConfig::generate("https://bridge.test");
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let store = Arc::new(GatedStore {
        inner: MemorySessionStore::new(),
        armed: AtomicBool::new(false),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    store
        .store(
            &config.handshake_topic,
            stored_entry(&config, SessionRole::Approver, Some(&[APPROVED][..])),
        )
        .unwrap();
    let recorder = Recorder::default();
    let session = Session::new(
        config.clone(),
        codec(),
        store.clone(),
        &recorder,
        PeerMetadata::named("Wallet"),
        None,
    )
    .unwrap();

    store.armed.store(true, Ordering::SeqCst);
    thread::scope(|scope| {
        let updater = scope.spawn(|| session.update(vec![APPROVED.to_string()], 7));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let killer = scope.spawn(|| session.kill());
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        killer.join().unwrap().unwrap();
        // The update may lose the race with the close flag either way.
        let _ = updater.join().unwrap();
    });

    assert!(session.is_closed());
    assert_eq!(store.load(&config.handshake_topic).unwrap(), None);
}
