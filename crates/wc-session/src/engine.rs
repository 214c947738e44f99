//! Session engine.
//!
//! A session moves through `Idle -> AwaitingPeer -> AwaitingApproval ->
//! Active -> Closed`. The stage is implied by the fields that are set
//! (handshake id, peer, approved accounts, closed flag) rather than kept in
//! an explicit enum.
//!
//! # Locking
//!
//! - `keys` guards `{current, next}`. Every encrypt and decrypt happens while
//!   holding it, including the hand-off of the ciphertext to the transport.
//! - `state`, `requests`, `queue` and `callbacks` are independent. They may
//!   be taken while `keys` is held, never the other way round.
//! - `persist_lock` serializes store writes and removal. It is taken before
//!   `keys` and `state`, never while holding them.
//! - Observers and response callbacks run with no engine lock held.
//!
//! # Key exchange
//!
//! If both sides start an exchange at the same time, the one with the lower
//! `(request id, client id)` wins. The loser answers the winner's exchange
//! and abandons its own; the winner ignores the loser's.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use wc_core::rpc::{session_params_from_value, session_params_to_value};
use wc_core::{
    CallError, FullyQualifiedConfig, Message, MessageType, MethodCall, PeerIdentity, PeerMetadata,
    Response, SessionParams, Value,
};
use wc_crypto::{CryptoError, SymmetricKey};

use crate::callback::{CallbackId, SessionCallback, SessionStatus};
use crate::codec::{CodecError, PayloadCodec};
use crate::error::SessionError;
use crate::id::new_call_id;
use crate::store::{PersistedSessionState, SessionRole, SessionStore};
use crate::transport::{Transport, TransportBuilder, TransportStatus};

/// Invoked at most once with the response to an outbound call.
pub type ResponseCallback = Box<dyn FnOnce(Response) + Send + 'static>;

struct KeyState {
    current: SymmetricKey,
    /// Set while a key exchange we initiated awaits the peer's answer.
    next: Option<SymmetricKey>,
    /// Request id of that exchange.
    exchange_id: Option<u64>,
}

#[derive(Default)]
struct PeerState {
    peer: Option<PeerIdentity>,
    handshake_id: Option<u64>,
    approved_accounts: Option<Vec<String>>,
    chain_id: Option<i64>,
    role: Option<SessionRole>,
}

struct QueuedCall {
    topic: String,
    call: MethodCall,
    callback: Option<ResponseCallback>,
}

struct Inner {
    config: FullyQualifiedConfig,
    client: PeerIdentity,
    codec: Arc<dyn PayloadCodec>,
    store: Arc<dyn SessionStore>,
    transport: Box<dyn Transport>,
    keys: Mutex<KeyState>,
    state: Mutex<PeerState>,
    requests: Mutex<HashMap<u64, ResponseCallback>>,
    queue: Mutex<VecDeque<QueuedCall>>,
    callbacks: RwLock<Vec<(CallbackId, Arc<dyn SessionCallback>)>>,
    next_callback_id: AtomicU64,
    persist_lock: Mutex<()>,
    closed: AtomicBool,
}

/// Handle to a running session. Cloning shares the same engine.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Create a session, or restore it if `store` already holds its topic.
    ///
    /// A restored session keeps its stored client identity; passing a
    /// different `client_id` fails with `ClientIdMismatch`.
    pub fn new(
        config: FullyQualifiedConfig,
        codec: Arc<dyn PayloadCodec>,
        store: Arc<dyn SessionStore>,
        transport_builder: &dyn TransportBuilder,
        client_meta: PeerMetadata,
        client_id: Option<String>,
    ) -> Result<Self, SessionError> {
        let restored = store.load(&config.handshake_topic)?;

        let (client, keys, state) = match restored {
            Some(saved) => {
                if let Some(requested) = client_id {
                    if requested != saved.client.id {
                        return Err(SessionError::ClientIdMismatch {
                            stored: saved.client.id,
                            requested,
                        });
                    }
                }
                info!("Session restored: {}", config.handshake_topic);
                (
                    saved.client,
                    KeyState {
                        current: saved.current_key,
                        next: saved.next_key,
                        exchange_id: None,
                    },
                    PeerState {
                        peer: saved.peer,
                        handshake_id: saved.handshake_id,
                        approved_accounts: saved.approved_accounts,
                        chain_id: saved.chain_id,
                        role: saved.role,
                    },
                )
            }
            None => (
                PeerIdentity::new(
                    client_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                    Some(client_meta),
                ),
                KeyState {
                    current: config.key.clone(),
                    next: None,
                    exchange_id: None,
                },
                PeerState::default(),
            ),
        };

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let on_status = weak.clone();
            let on_message = weak.clone();
            let transport = transport_builder.build(
                &config.bridge,
                Arc::new(move |status: TransportStatus| {
                    if let Some(inner) = on_status.upgrade() {
                        Session { inner }.handle_status(status);
                    }
                }),
                Arc::new(move |message: Message| {
                    if let Some(inner) = on_message.upgrade() {
                        Session { inner }.handle_message(message);
                    }
                }),
            );

            Inner {
                config,
                client,
                codec,
                store,
                transport,
                keys: Mutex::new(keys),
                state: Mutex::new(state),
                requests: Mutex::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                callbacks: RwLock::new(Vec::new()),
                next_callback_id: AtomicU64::new(0),
                persist_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
            }
        });

        let session = Session { inner };
        session.persist()?;
        if session.is_exchanging_key() {
            session.resume_key_exchange()?;
        }
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    pub fn add_callback(&self, callback: Arc<dyn SessionCallback>) -> CallbackId {
        let id = CallbackId(self.inner.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.inner.callbacks.write().push((id, callback));
        id
    }

    /// Returns `false` if no observer was registered under `id`.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.inner.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(registered, _)| *registered != id);
        callbacks.len() != before
    }

    pub fn clear_callbacks(&self) {
        self.inner.callbacks.write().clear();
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &FullyQualifiedConfig {
        &self.inner.config
    }

    pub fn client(&self) -> &PeerIdentity {
        &self.inner.client
    }

    pub fn peer(&self) -> Option<PeerIdentity> {
        self.inner.state.lock().peer.clone()
    }

    pub fn peer_meta(&self) -> Option<PeerMetadata> {
        self.inner
            .state
            .lock()
            .peer
            .as_ref()
            .and_then(|peer| peer.metadata.clone())
    }

    pub fn approved_accounts(&self) -> Option<Vec<String>> {
        self.inner.state.lock().approved_accounts.clone()
    }

    pub fn chain_id(&self) -> Option<i64> {
        self.inner.state.lock().chain_id
    }

    pub fn handshake_id(&self) -> Option<u64> {
        self.inner.state.lock().handshake_id
    }

    /// `None` until this session has offered or received a session request.
    pub fn role(&self) -> Option<SessionRole> {
        self.inner.state.lock().role
    }

    /// `true` while a key exchange we started awaits the peer's answer.
    pub fn is_exchanging_key(&self) -> bool {
        self.inner.keys.lock().next.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Connect and listen on the handshake topic (approving side).
    pub fn init(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.inner.transport.connect() {
            self.inner
                .transport
                .send(Message::subscribe(self.inner.config.handshake_topic.clone()));
        }
        Ok(())
    }

    /// Connect and send the session request to the handshake topic (offering side).
    pub fn offer(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.inner.transport.connect();

        let id = new_call_id();
        {
            let mut state = self.inner.state.lock();
            state.handshake_id = Some(id);
            state.role = Some(SessionRole::Offerer);
        }
        self.persist()?;

        let weak = Arc::downgrade(&self.inner);
        let call = MethodCall::SessionRequest {
            id,
            peer: self.inner.client.clone(),
        };
        info!("Offering session {} (request {})", self.inner.config.handshake_topic, id);
        self.send(
            call,
            Some(self.inner.config.handshake_topic.clone()),
            false,
            Some(Box::new(move |response| {
                if let Some(inner) = weak.upgrade() {
                    Session { inner }.handle_offer_response(response);
                }
            })),
        )
    }

    /// Approve the pending handshake. No-op without one.
    pub fn approve(&self, accounts: Vec<String>, chain_id: i64) -> Result<(), SessionError> {
        self.ensure_open()?;
        let handshake_id = {
            let mut state = self.inner.state.lock();
            let Some(handshake_id) = state.handshake_id else {
                debug!("approve() without a pending handshake");
                return Ok(());
            };
            state.approved_accounts = Some(accounts.clone());
            state.chain_id = Some(chain_id);
            handshake_id
        };

        let params = SessionParams {
            approved: true,
            chain_id: Some(chain_id),
            accounts: Some(accounts),
            peer: Some(self.inner.client.clone()),
        };
        self.send(
            MethodCall::Response(Response::ok(handshake_id, session_params_to_value(&params))),
            None,
            false,
            None,
        )?;
        self.persist()?;
        info!("Session approved: {}", self.inner.config.handshake_topic);
        self.notify_status(&SessionStatus::Approved);
        Ok(())
    }

    /// Decline the pending handshake (if any) and end the session.
    pub fn reject(&self) -> Result<(), SessionError> {
        let handshake_id = self.inner.state.lock().handshake_id;
        let sent = match handshake_id {
            Some(id) if !self.is_closed() => self.send(
                MethodCall::Response(Response::ok(
                    id,
                    session_params_to_value(&SessionParams::rejected()),
                )),
                None,
                false,
                None,
            ),
            _ => Ok(()),
        };
        self.end_session();
        sent
    }

    /// Push new accounts / chain to the peer. Also becomes the local approved set.
    pub fn update(&self, accounts: Vec<String>, chain_id: i64) -> Result<(), SessionError> {
        self.ensure_open()?;
        {
            let mut state = self.inner.state.lock();
            state.approved_accounts = Some(accounts.clone());
            state.chain_id = Some(chain_id);
        }
        self.persist()?;

        self.send(
            MethodCall::SessionUpdate {
                id: new_call_id(),
                params: SessionParams {
                    approved: true,
                    chain_id: Some(chain_id),
                    accounts: Some(accounts),
                    peer: None,
                },
            },
            None,
            false,
            None,
        )
    }

    /// Tell the peer the session is over, then end it unconditionally.
    pub fn kill(&self) -> Result<(), SessionError> {
        let sent = if self.is_closed() {
            Ok(())
        } else {
            self.send(
                MethodCall::SessionUpdate {
                    id: new_call_id(),
                    params: SessionParams::rejected(),
                },
                None,
                false,
                None,
            )
        };
        self.end_session();
        match sent {
            Err(SessionError::NoPeer) => Ok(()),
            other => other,
        }
    }

    pub fn approve_request(&self, id: u64, result: impl Into<Value>) -> Result<(), SessionError> {
        self.send(MethodCall::Response(Response::ok(id, result)), None, false, None)
    }

    pub fn reject_request(
        &self,
        id: u64,
        code: i64,
        message: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.send(
            MethodCall::Response(Response::error(id, code, message)),
            None,
            false,
            None,
        )
    }

    /// Send an arbitrary call to the peer, optionally awaiting its response.
    pub fn perform_method_call(
        &self,
        call: MethodCall,
        callback: Option<ResponseCallback>,
    ) -> Result<(), SessionError> {
        self.send(call, None, false, callback)
    }

    /// Start a key exchange with the peer.
    ///
    /// Until the peer answers, other outbound calls are queued. A `true`
    /// answer makes the new key current; anything else keeps the old key.
    pub fn rotate_key(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        let topic = self.peer_topic()?;
        let next_key = SymmetricKey::generate();
        let call = MethodCall::ExchangeKey {
            id: new_call_id(),
            next_key: next_key.clone(),
            peer: self.inner.client.clone(),
        };

        {
            let mut keys = self.inner.keys.lock();
            if keys.next.is_some() {
                return Err(SessionError::RotationInProgress);
            }
            self.publish_locked(&keys, &call, &topic, Some(self.key_exchange_callback()))?;
            keys.next = Some(next_key);
            keys.exchange_id = Some(call.id());
        }
        info!("Key exchange started (request {})", call.id());
        self.persist()
    }

    /// Re-send an exchange that was still pending when the session was stored.
    /// Its original response callback did not survive the restart.
    fn resume_key_exchange(&self) -> Result<(), SessionError> {
        let topic = match self.peer_topic() {
            Ok(topic) => topic,
            Err(_) => {
                warn!("Abandoning interrupted key exchange, no peer known");
                self.inner.keys.lock().next = None;
                return self.persist();
            }
        };

        let mut keys = self.inner.keys.lock();
        let Some(next_key) = keys.next.clone() else {
            return Ok(());
        };
        let call = MethodCall::ExchangeKey {
            id: new_call_id(),
            next_key,
            peer: self.inner.client.clone(),
        };
        self.publish_locked(&keys, &call, &topic, Some(self.key_exchange_callback()))?;
        keys.exchange_id = Some(call.id());
        info!("Resumed key exchange (request {})", call.id());
        Ok(())
    }

    fn key_exchange_callback(&self) -> ResponseCallback {
        let weak = Arc::downgrade(&self.inner);
        Box::new(move |response| {
            if let Some(inner) = weak.upgrade() {
                Session { inner }.finish_key_exchange(response);
            }
        })
    }

    fn finish_key_exchange(&self, response: Response) {
        let accepted = matches!(response.result, Ok(Value::Bool(true)));
        {
            let mut keys = self.inner.keys.lock();
            if keys.exchange_id != Some(response.id) {
                debug!("Ignoring answer to superseded key exchange {}", response.id);
                return;
            }
            keys.exchange_id = None;
            match keys.next.take() {
                Some(next) if accepted => keys.current = next,
                _ => {}
            }
        }
        if accepted {
            info!("Key exchange accepted, switched keys");
        } else {
            warn!("Key exchange declined by peer, keeping current key");
        }
        self.persist_or_report();
        self.drain_queue();
    }

    /// Remove persisted state, close the transport and notify observers. Idempotent.
    fn end_session(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let _guard = self.inner.persist_lock.lock();
            if let Err(err) = self.inner.store.remove(&self.inner.config.handshake_topic) {
                warn!("Failed to remove session state: {}", err);
            }
        }
        self.inner.state.lock().approved_accounts = None;
        self.inner.requests.lock().clear();
        self.inner.queue.lock().clear();
        self.inner.transport.close();
        info!("Session closed: {}", self.inner.config.handshake_topic);
        self.notify_status(&SessionStatus::Closed);
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Encrypt and publish `call`. Without an explicit topic the peer's topic
    /// is used. Unless `force` is set, calls are queued while a key exchange
    /// is pending or earlier calls are still queued.
    fn send(
        &self,
        call: MethodCall,
        topic: Option<String>,
        force: bool,
        callback: Option<ResponseCallback>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let topic = match topic {
            Some(topic) => topic,
            None => self.peer_topic()?,
        };

        let keys = self.inner.keys.lock();
        if !force {
            let mut queue = self.inner.queue.lock();
            if keys.next.is_some() || !queue.is_empty() {
                debug!("Key exchange pending, queueing request {}", call.id());
                queue.push_back(QueuedCall {
                    topic,
                    call,
                    callback,
                });
                return Ok(());
            }
        }
        self.publish_locked(&keys, &call, &topic, callback)
    }

    /// Encrypt under the current key and hand the envelope to the transport.
    /// The caller holds the key lock.
    fn publish_locked(
        &self,
        keys: &KeyState,
        call: &MethodCall,
        topic: &str,
        callback: Option<ResponseCallback>,
    ) -> Result<(), SessionError> {
        let payload = self.inner.codec.prepare(call, &keys.current)?;
        if let Some(callback) = callback {
            self.inner.requests.lock().insert(call.id(), callback);
        }
        debug!(
            "Sending request {} ({}) on {}",
            call.id(),
            call.method().unwrap_or("response"),
            topic
        );
        self.inner.transport.send(Message::publish(topic, payload));
        Ok(())
    }

    fn drain_queue(&self) {
        loop {
            let keys = self.inner.keys.lock();
            if keys.next.is_some() {
                return;
            }
            let Some(queued) = self.inner.queue.lock().pop_front() else {
                return;
            };
            let result = self.publish_locked(&keys, &queued.call, &queued.topic, queued.callback);
            drop(keys);
            if let Err(err) = result {
                warn!("Dropping queued request {}: {}", queued.call.id(), err);
                self.notify_status(&SessionStatus::Error(err));
            }
        }
    }

    fn peer_topic(&self) -> Result<String, SessionError> {
        self.inner
            .state
            .lock()
            .peer
            .as_ref()
            .map(|peer| peer.id.clone())
            .ok_or(SessionError::NoPeer)
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    fn handle_status(&self, status: TransportStatus) {
        debug!("Transport status: {:?}", status);
        match status {
            TransportStatus::Connected => {
                if !self.is_closed() {
                    self.inner
                        .transport
                        .send(Message::subscribe(self.inner.client.id.clone()));
                }
                self.notify_status(&SessionStatus::Connected);
            }
            TransportStatus::Disconnected => self.notify_status(&SessionStatus::Disconnected),
            TransportStatus::Error(cause) => {
                self.notify_status(&SessionStatus::Error(SessionError::Transport(cause)))
            }
        }
    }

    fn handle_message(&self, message: Message) {
        if message.kind != MessageType::Pub {
            debug!("Ignoring {:?} envelope on {}", message.kind, message.topic);
            return;
        }
        if self.is_closed() {
            return;
        }

        let mut promoted = false;
        let parsed = {
            let mut keys = self.inner.keys.lock();
            let mut decoded = self.inner.codec.parse(&message.payload, &keys.current);
            if matches!(decoded, Err(CodecError::Crypto(CryptoError::Authentication))) {
                if let Some(next) = keys.next.clone() {
                    if let Ok(call) = self.inner.codec.parse(&message.payload, &next) {
                        // The peer took our pending key; its answer got lost.
                        info!("Peer switched to the pending key, completing key exchange");
                        keys.current = next;
                        keys.next = None;
                        if let Some(id) = keys.exchange_id.take() {
                            self.inner.requests.lock().remove(&id);
                        }
                        promoted = true;
                        decoded = Ok(call);
                    }
                }
            }
            match decoded {
                Ok(MethodCall::ExchangeKey { id, next_key, peer }) => {
                    self.accept_key_exchange(&mut keys, id, next_key, peer)
                }
                other => other.map(Some).map_err(SessionError::from),
            }
        };
        if promoted {
            self.persist_or_report();
            self.drain_queue();
        }

        let call = match parsed {
            Ok(Some(MethodCall::Response(response))) => {
                self.resolve_response(response);
                return;
            }
            Ok(Some(call)) => call,
            Ok(None) => return,
            Err(err) => {
                self.handle_inbound_error(err);
                return;
            }
        };
        debug!("Received request {} ({})", call.id(), call.method().unwrap_or("response"));

        match &call {
            MethodCall::SessionRequest { id, peer } => {
                {
                    let mut state = self.inner.state.lock();
                    state.handshake_id = Some(*id);
                    state.peer = Some(peer.clone());
                    state.role = Some(SessionRole::Approver);
                }
                self.persist_or_report();
                self.notify_method_call(&call);
            }
            MethodCall::SessionUpdate { params, .. } => {
                if !params.approved {
                    self.notify_method_call(&call);
                    self.end_session();
                } else if self.apply_peer_update(params) {
                    self.persist_or_report();
                    self.notify_method_call(&call);
                } else {
                    warn!("Ignoring session update {} from peer", call.id());
                }
            }
            MethodCall::ExchangeKey { .. } => {
                info!("Peer rotated the session key");
                self.persist_or_report();
                self.notify_method_call(&call);
                self.drain_queue();
            }
            MethodCall::SendTransaction { .. }
            | MethodCall::SignMessage { .. }
            | MethodCall::PersonalSignMessage { .. } => {
                let address = call.account().unwrap_or_default();
                if self.is_approved_account(address) {
                    self.notify_method_call(&call);
                } else {
                    warn!("Rejecting request {} for unapproved account", call.id());
                    self.answer_call_error(&CallError::InvalidAccount {
                        id: call.id(),
                        address: address.to_string(),
                    });
                }
            }
            MethodCall::Custom { .. } => self.notify_method_call(&call),
            // Resolved above, responses are never broadcast.
            MethodCall::Response(_) => {}
        }
    }

    /// Answer an inbound exchange and switch to its key. The caller holds the
    /// key lock. `Ok(None)` when our own concurrent exchange takes precedence.
    fn accept_key_exchange(
        &self,
        keys: &mut KeyState,
        id: u64,
        next_key: SymmetricKey,
        peer: PeerIdentity,
    ) -> Result<Option<MethodCall>, SessionError> {
        if let Some(ours) = keys.exchange_id {
            if (ours, self.inner.client.id.as_str()) < (id, peer.id.as_str()) {
                info!("Concurrent key exchange {} loses to ours ({})", id, ours);
                return Ok(None);
            }
            info!("Concurrent key exchange {} wins over ours ({})", id, ours);
            keys.next = None;
            keys.exchange_id = None;
            self.inner.requests.lock().remove(&ours);
        }

        // Answer under the old key and switch before anyone else can encrypt.
        self.inner.state.lock().peer = Some(peer.clone());
        let answer = MethodCall::Response(Response::ok(id, true));
        self.publish_locked(keys, &answer, &peer.id, None)?;
        keys.current = next_key.clone();
        keys.next = None;
        Ok(Some(MethodCall::ExchangeKey { id, next_key, peer }))
    }

    /// Accounts and chain from an approved peer update. Only the offering
    /// side of an approved session takes them; an approver's account set is
    /// its own.
    fn apply_peer_update(&self, params: &SessionParams) -> bool {
        let mut state = self.inner.state.lock();
        if state.role != Some(SessionRole::Offerer) || state.approved_accounts.is_none() {
            return false;
        }
        if params.accounts.is_some() {
            state.approved_accounts = params.accounts.clone();
        }
        if params.chain_id.is_some() {
            state.chain_id = params.chain_id;
        }
        true
    }

    fn resolve_response(&self, response: Response) {
        let callback = self.inner.requests.lock().remove(&response.id);
        match callback {
            Some(callback) => {
                let id = response.id;
                if catch_unwind(AssertUnwindSafe(|| callback(response))).is_err() {
                    warn!("Response callback for {} panicked", id);
                }
            }
            None => debug!("Dropping unmatched response {}", response.id),
        }
    }

    fn handle_offer_response(&self, response: Response) {
        let params = match response.result {
            Ok(value) => session_params_from_value(&value).map_err(|detail| {
                SessionError::Call(CallError::InvalidRequest {
                    id: response.id,
                    detail,
                })
            }),
            Err(err) => {
                warn!("Session request refused: {} ({})", err.message, err.code);
                self.end_session();
                return;
            }
        };

        match params {
            Ok(params) if params.approved => {
                {
                    let mut state = self.inner.state.lock();
                    if params.peer.is_some() {
                        state.peer = params.peer;
                    }
                    state.approved_accounts = params.accounts;
                    state.chain_id = params.chain_id;
                }
                self.persist_or_report();
                info!("Session approved by peer: {}", self.inner.config.handshake_topic);
                self.notify_status(&SessionStatus::Approved);
            }
            Ok(_) => {
                info!("Session declined by peer");
                self.end_session();
            }
            Err(err) => {
                self.notify_status(&SessionStatus::Error(err));
                self.end_session();
            }
        }
    }

    fn handle_inbound_error(&self, err: SessionError) {
        match &err {
            SessionError::Authentication => warn!("Dropping message that failed authentication"),
            SessionError::Call(call_err) => {
                warn!("Invalid inbound request: {}", call_err);
                self.answer_call_error(call_err);
            }
            other => warn!("Dropping undecodable message: {}", other),
        }
        self.notify_status(&SessionStatus::Error(err));
    }

    fn answer_call_error(&self, err: &CallError) {
        let Some(response) = err.to_response() else {
            return;
        };
        if let Err(send_err) = self.send(MethodCall::Response(response), None, false, None) {
            warn!("Failed to answer request {:?}: {}", err.id(), send_err);
        }
    }

    fn is_approved_account(&self, address: &str) -> bool {
        self.inner
            .state
            .lock()
            .approved_accounts
            .as_ref()
            .is_some_and(|accounts| accounts.iter().any(|a| a.eq_ignore_ascii_case(address)))
    }

    // -----------------------------------------------------------------------
    // Persistence and notification
    // -----------------------------------------------------------------------

    fn persist(&self) -> Result<(), SessionError> {
        let _guard = self.inner.persist_lock.lock();
        if self.is_closed() {
            return Ok(());
        }
        let (current_key, next_key) = {
            let keys = self.inner.keys.lock();
            (keys.current.clone(), keys.next.clone())
        };
        let state = {
            let state = self.inner.state.lock();
            PersistedSessionState {
                config: self.inner.config.clone(),
                client: self.inner.client.clone(),
                peer: state.peer.clone(),
                handshake_id: state.handshake_id,
                current_key,
                next_key,
                approved_accounts: state.approved_accounts.clone(),
                chain_id: state.chain_id,
                role: state.role,
            }
        };
        self.inner
            .store
            .store(&self.inner.config.handshake_topic, state)?;
        Ok(())
    }

    fn persist_or_report(&self) {
        if let Err(err) = self.persist() {
            warn!("Failed to persist session: {}", err);
            self.notify_status(&SessionStatus::Error(err));
        }
    }

    fn observers(&self) -> Vec<Arc<dyn SessionCallback>> {
        self.inner
            .callbacks
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect()
    }

    fn notify_status(&self, status: &SessionStatus) {
        for observer in self.observers() {
            if catch_unwind(AssertUnwindSafe(|| observer.on_status(status))).is_err() {
                warn!("Session observer panicked on status {:?}", status);
            }
        }
    }

    fn notify_method_call(&self, call: &MethodCall) {
        for observer in self.observers() {
            if catch_unwind(AssertUnwindSafe(|| observer.on_method_call(call))).is_err() {
                warn!("Session observer panicked on request {}", call.id());
            }
        }
    }
}
