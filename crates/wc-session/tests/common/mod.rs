//! Shared fixtures: a transport that records envelopes and lets the test
//! inject inbound ones, and an observer forwarding events into a channel.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use wc_core::{FullyQualifiedConfig, Message, MessageType, MethodCall, PeerIdentity, PeerMetadata};
use wc_crypto::SymmetricKey;
use wc_session::{
    JsonPayloadCodec, MemorySessionStore, MessageHandler, PayloadCodec, PersistedSessionState,
    Session, SessionCallback, SessionRole, SessionStatus, SessionStore, StatusHandler, Transport,
    TransportBuilder, TransportStatus,
};

pub const WALLET_ID: &str = "wallet-client";
pub const PEER_ID: &str = "dapp-peer";

#[derive(Default)]
struct RecorderState {
    sent: Vec<Message>,
    on_status: Option<StatusHandler>,
    on_message: Option<MessageHandler>,
    connects: usize,
    closed: bool,
}

/// Transport builder and handle on the transport it built.
#[derive(Clone, Default)]
pub struct Recorder {
    state: Arc<Mutex<RecorderState>>,
}

impl Recorder {
    pub fn sent(&self) -> Vec<Message> {
        self.state.lock().sent.clone()
    }

    pub fn published(&self) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter(|m| m.kind == MessageType::Pub)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Feed an inbound envelope to the engine, synchronously.
    pub fn deliver(&self, message: Message) {
        let handler = self.state.lock().on_message.clone().expect("transport built");
        handler(message);
    }

    pub fn status(&self, status: TransportStatus) {
        let handler = self.state.lock().on_status.clone().expect("transport built");
        handler(status);
    }
}

struct RecordingTransport {
    state: Arc<Mutex<RecorderState>>,
}

impl Transport for RecordingTransport {
    fn connect(&self) -> bool {
        let mut state = self.state.lock();
        state.connects += 1;
        state.connects == 1
    }

    fn send(&self, message: Message) {
        self.state.lock().sent.push(message);
    }

    fn close(&self) {
        self.state.lock().closed = true;
    }
}

impl TransportBuilder for Recorder {
    fn build(
        &self,
        _url: &str,
        on_status: StatusHandler,
        on_message: MessageHandler,
    ) -> Box<dyn Transport> {
        let mut state = self.state.lock();
        state.on_status = Some(on_status);
        state.on_message = Some(on_message);
        Box::new(RecordingTransport {
            state: self.state.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Status(SessionStatus),
    Call(MethodCall),
}

pub struct Events {
    tx: mpsc::UnboundedSender<Event>,
}

impl Events {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }
}

impl SessionCallback for Events {
    fn on_status(&self, status: &SessionStatus) {
        let _ = self.tx.send(Event::Status(status.clone()));
    }

    fn on_method_call(&self, call: &MethodCall) {
        let _ = self.tx.send(Event::Call(call.clone()));
    }
}

pub fn observe(session: &Session) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.add_callback(Arc::new(Events::new(tx)));
    rx
}

/// Drain whatever events are already queued.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait until an event matching `pred` arrives, skipping others.
pub async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("observer channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

pub struct Fixture {
    pub session: Session,
    pub recorder: Recorder,
    pub store: Arc<MemorySessionStore>,
    pub config: FullyQualifiedConfig,
}

impl Fixture {
    pub fn key(&self) -> &SymmetricKey {
        &self.config.key
    }

    /// Envelope carrying `call` encrypted under `key`, addressed to the wallet.
    pub fn inbound(&self, call: &MethodCall, key: &SymmetricKey) -> Message {
        Message::publish(WALLET_ID, JsonPayloadCodec.prepare(call, key).unwrap())
    }

    pub fn last_published(&self) -> Message {
        self.recorder.published().pop().expect("nothing published")
    }
}

pub fn codec() -> Arc<dyn PayloadCodec> {
    Arc::new(JsonPayloadCodec)
}

pub fn decode(message: &Message, key: &SymmetricKey) -> MethodCall {
    JsonPayloadCodec.parse(&message.payload, key).unwrap()
}

/// Wallet session restored from a store entry with an approved peer.
pub fn active_session(accounts: &[&str]) -> Fixture {
    restored_session(SessionRole::Approver, Some(accounts))
}

/// Session restored from a store entry for the given side of the handshake.
/// `accounts` of `None` leaves the session awaiting approval.
pub fn restored_session(role: SessionRole, accounts: Option<&[&str]>) -> Fixture {
    let config = FullyQualifiedConfig::generate("https://bridge.test");
    let store = Arc::new(MemorySessionStore::new());
    store
        .store(&config.handshake_topic, stored_entry(&config, role, accounts))
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

    Fixture {
        session,
        recorder,
        store,
        config,
    }
}

/// Store entry for a session between `WALLET_ID` and `PEER_ID`.
pub fn stored_entry(
    config: &FullyQualifiedConfig,
    role: SessionRole,
    accounts: Option<&[&str]>,
) -> PersistedSessionState {
    PersistedSessionState {
        config: config.clone(),
        client: PeerIdentity::new(WALLET_ID, Some(PeerMetadata::named("Wallet"))),
        peer: Some(PeerIdentity::new(PEER_ID, Some(PeerMetadata::named("Dapp")))),
        handshake_id: Some(1),
        current_key: config.key.clone(),
        next_key: None,
        approved_accounts: accounts.map(|accounts| accounts.iter().map(|a| a.to_string()).collect()),
        chain_id: accounts.map(|_| 1),
        role: Some(role),
    }
}

/// Brand new session with nothing in the store.
pub fn fresh_session() -> Fixture {
    let config = FullyQualifiedConfig::generate("https://bridge.test");
    let store = Arc::new(MemorySessionStore::new());
    let recorder = Recorder::default();
    let session = Session::new(
        config.clone(),
        codec(),
        store.clone(),
        &recorder,
        PeerMetadata::named("Wallet"),
        Some(WALLET_ID.to_string()),
    )
    .unwrap();

    Fixture {
        session,
        recorder,
        store,
        config,
    }
}
