//! WebSocket transport to a bridge.
//!
//! Envelopes are JSON text frames. Outbound envelopes go through an
//! unbounded channel, so `send` never blocks and anything sent before the
//! socket opens is flushed right after the handshake. `close` lets the socket
//! task write out everything already queued before it closes the socket and
//! reports `Disconnected`. There is no reconnect policy: a dropped socket
//! reports `Disconnected` and the next `send` or `connect` dials again.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use wc_core::Message;

use crate::transport::{MessageHandler, StatusHandler, Transport, TransportBuilder, TransportStatus};

/// Rewrite an `http(s)` bridge URL to its `ws(s)` form.
pub fn bridge_ws_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}

#[derive(Default)]
struct Connection {
    outgoing_tx: Option<mpsc::UnboundedSender<Message>>,
    generation: u64,
}

pub struct WsTransport {
    url: String,
    on_status: StatusHandler,
    on_message: MessageHandler,
    connection: Arc<Mutex<Connection>>,
}

impl WsTransport {
    pub fn new(url: &str, on_status: StatusHandler, on_message: MessageHandler) -> Self {
        Self {
            url: bridge_ws_url(url),
            on_status,
            on_message,
            connection: Arc::new(Mutex::new(Connection::default())),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Spawn the socket task unless one is running. `Ok(false)` if already connected.
    fn start(&self) -> Result<bool, String> {
        let mut connection = self.connection.lock();
        if connection.outgoing_tx.is_some() {
            return Ok(false);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| format!("no async runtime: {}", err))?;

        let (tx, rx) = mpsc::unbounded_channel();
        connection.outgoing_tx = Some(tx);
        connection.generation += 1;
        let generation = connection.generation;
        drop(connection);

        runtime.spawn(run_socket(
            self.url.clone(),
            rx,
            self.on_status.clone(),
            self.on_message.clone(),
            self.connection.clone(),
            generation,
        ));
        Ok(true)
    }
}

impl Transport for WsTransport {
    fn connect(&self) -> bool {
        match self.start() {
            Ok(started) => started,
            Err(cause) => {
                (self.on_status)(TransportStatus::Error(cause));
                false
            }
        }
    }

    fn send(&self, message: Message) {
        if let Err(cause) = self.start() {
            warn!("Dropping envelope for {}: {}", message.topic, cause);
            return;
        }
        let connection = self.connection.lock();
        let queued = connection
            .outgoing_tx
            .as_ref()
            .is_some_and(|tx| tx.send(message).is_ok());
        if !queued {
            warn!("Bridge socket closed while sending");
        }
    }

    fn close(&self) {
        // The socket task drains the channel, then sees it closed.
        if self.connection.lock().outgoing_tx.take().is_some() {
            debug!("Closing bridge socket {}", self.url);
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_socket(
    url: String,
    mut rx: mpsc::UnboundedReceiver<Message>,
    on_status: StatusHandler,
    on_message: MessageHandler,
    connection: Arc<Mutex<Connection>>,
    generation: u64,
) {
    info!("Connecting to bridge: {}", url);

    match connect_async(url.as_str()).await {
        Ok((stream, _)) => {
            info!("Bridge connected: {}", url);
            on_status(TransportStatus::Connected);
            let (mut sink, mut stream) = stream.split();

            loop {
                tokio::select! {
                    outgoing = rx.recv() => {
                        let Some(message) = outgoing else {
                            let _ = sink.close().await;
                            break;
                        };
                        let text = match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to encode envelope: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                            on_status(TransportStatus::Error(e.to_string()));
                            break;
                        }
                    }
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<Message>(&text) {
                                Ok(message) => on_message(message),
                                Err(e) => warn!("Dropping malformed envelope: {}", e),
                            },
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                on_status(TransportStatus::Error(e.to_string()));
                                break;
                            }
                        }
                    }
                }
            }
        }
        Err(e) => {
            warn!("Failed to connect to bridge {}: {}", url, e);
            on_status(TransportStatus::Error(e.to_string()));
        }
    }

    {
        let mut connection = connection.lock();
        if connection.generation == generation {
            connection.outgoing_tx = None;
        }
    }
    on_status(TransportStatus::Disconnected);
}

/// Builds a `WsTransport` per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransportBuilder;

impl TransportBuilder for WsTransportBuilder {
    fn build(
        &self,
        url: &str,
        on_status: StatusHandler,
        on_message: MessageHandler,
    ) -> Box<dyn Transport> {
        Box::new(WsTransport::new(url, on_status, on_message))
    }
}
