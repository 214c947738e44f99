//! In-process bridge.
//!
//! `LocalRelay` behaves like the public bridge: a `sub` envelope registers
//! the connection for a topic, a `pub` envelope is forwarded to every
//! subscriber of its topic. A `pub` for a topic nobody listens to is cached
//! (last one wins) and handed to the next subscriber of that topic.
//!
//! Each `LocalTransport` delivers on its own tokio task, one envelope at a
//! time, like a socket reader would.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wc_core::{Message, MessageType};

use crate::transport::{MessageHandler, StatusHandler, Transport, TransportBuilder, TransportStatus};

type ConnectionId = u64;

#[derive(Default)]
struct RelayState {
    next_connection: ConnectionId,
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
    subscribers: HashMap<String, Vec<ConnectionId>>,
    cache: HashMap<String, Message>,
}

#[derive(Clone, Default)]
pub struct LocalRelay {
    state: Arc<Mutex<RelayState>>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport builder whose transports attach to this relay.
    pub fn builder(&self) -> LocalTransportBuilder {
        LocalTransportBuilder {
            relay: self.clone(),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .subscribers
            .get(topic)
            .map_or(0, Vec::len)
    }

    pub fn has_cached(&self, topic: &str) -> bool {
        self.state.lock().cache.contains_key(topic)
    }

    fn open(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.next_connection += 1;
        let id = state.next_connection;
        state.connections.insert(id, tx);
        (id, rx)
    }

    fn close(&self, connection: ConnectionId) {
        let mut state = self.state.lock();
        state.connections.remove(&connection);
        for subscribers in state.subscribers.values_mut() {
            subscribers.retain(|id| *id != connection);
        }
    }

    fn handle(&self, connection: ConnectionId, message: Message) {
        let mut state = self.state.lock();
        match message.kind {
            MessageType::Sub => {
                let subscribers = state.subscribers.entry(message.topic.clone()).or_default();
                if !subscribers.contains(&connection) {
                    subscribers.push(connection);
                }
                if let Some(cached) = state.cache.remove(&message.topic) {
                    debug!("Replaying cached message on {}", message.topic);
                    if let Some(tx) = state.connections.get(&connection) {
                        let _ = tx.send(cached);
                    }
                }
            }
            MessageType::Pub => {
                let mut delivered = false;
                if let Some(subscribers) = state.subscribers.get(&message.topic) {
                    for id in subscribers {
                        if let Some(tx) = state.connections.get(id) {
                            delivered |= tx.send(message.clone()).is_ok();
                        }
                    }
                }
                if !delivered {
                    debug!("Caching message for {}", message.topic);
                    state.cache.insert(message.topic.clone(), message);
                }
            }
            MessageType::Unknown => warn!("Dropping envelope of unknown type on {}", message.topic),
        }
    }
}

pub struct LocalTransport {
    relay: LocalRelay,
    on_status: StatusHandler,
    on_message: MessageHandler,
    connection: Mutex<Option<ConnectionId>>,
}

impl LocalTransport {
    pub fn new(relay: LocalRelay, on_status: StatusHandler, on_message: MessageHandler) -> Self {
        Self {
            relay,
            on_status,
            on_message,
            connection: Mutex::new(None),
        }
    }

    /// Attach to the relay unless attached. Returns the connection and
    /// whether it is new.
    fn start(&self) -> Result<(ConnectionId, bool), String> {
        let mut connection = self.connection.lock();
        if let Some(id) = *connection {
            return Ok((id, false));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| format!("no async runtime: {}", err))?;

        let (id, mut rx) = self.relay.open();
        *connection = Some(id);
        drop(connection);

        let on_status = self.on_status.clone();
        let on_message = self.on_message.clone();
        runtime.spawn(async move {
            on_status(TransportStatus::Connected);
            while let Some(message) = rx.recv().await {
                on_message(message);
            }
            on_status(TransportStatus::Disconnected);
        });
        Ok((id, true))
    }
}

impl Transport for LocalTransport {
    fn connect(&self) -> bool {
        match self.start() {
            Ok((_, started)) => started,
            Err(cause) => {
                (self.on_status)(TransportStatus::Error(cause));
                false
            }
        }
    }

    fn send(&self, message: Message) {
        match self.start() {
            Ok((id, _)) => self.relay.handle(id, message),
            Err(cause) => warn!("Dropping envelope for {}: {}", message.topic, cause),
        }
    }

    fn close(&self) {
        if let Some(id) = self.connection.lock().take() {
            self.relay.close(id);
        }
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Clone)]
pub struct LocalTransportBuilder {
    relay: LocalRelay,
}

impl TransportBuilder for LocalTransportBuilder {
    fn build(
        &self,
        _url: &str,
        on_status: StatusHandler,
        on_message: MessageHandler,
    ) -> Box<dyn Transport> {
        Box::new(LocalTransport::new(self.relay.clone(), on_status, on_message))
    }
}
