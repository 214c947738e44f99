//! Transport contract consumed by the engine.
//!
//! A transport is a pub/sub pipe to the bridge. It reports its state and
//! inbound envelopes through the handlers it was built with. Handlers for a
//! single transport are never invoked concurrently with each other.

use std::sync::Arc;

use wc_core::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    Connected,
    Disconnected,
    Error(String),
}

pub type StatusHandler = Arc<dyn Fn(TransportStatus) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

pub trait Transport: Send + Sync {
    /// Start connecting. Returns `true` if a new connection attempt was initiated.
    fn connect(&self) -> bool;

    /// Hand an envelope to the transport. Never blocks and never invokes the
    /// handlers before returning; failures are reported through the status
    /// handler later.
    fn send(&self, message: Message);

    /// Stop the connection. Envelopes already handed to `send` are still
    /// written out before `Disconnected` is reported.
    fn close(&self);
}

pub trait TransportBuilder: Send + Sync {
    fn build(
        &self,
        url: &str,
        on_status: StatusHandler,
        on_message: MessageHandler,
    ) -> Box<dyn Transport>;
}
