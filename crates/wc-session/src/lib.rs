//! wc session engine.
//!
//! This crate provides:
//! - `Session`: the handshake / approval / key rotation state machine
//! - `PayloadCodec`: `MethodCall` <-> encrypted wire string
//! - `Transport` and `SessionStore`: the collaborator contracts the engine
//!   is built against, plus concrete implementations (`WsTransport`,
//!   `LocalRelay`, `FileSessionStore`, `MemorySessionStore`)
//!
//! # Design
//!
//! All encryption and decryption happens under a single key lock, so a key
//! swap can never interleave with a send that still uses the previous key.
//! While a key exchange is pending, regular outbound calls are queued and
//! flushed in order once the peer has answered.

#![forbid(unsafe_code)]

pub mod callback;
pub mod codec;
pub mod engine;
pub mod error;
pub mod id;
pub mod relay;
pub mod store;
pub mod transport;
pub mod ws;

pub use callback::{CallbackId, SessionCallback, SessionStatus};
pub use codec::{CodecError, JsonPayloadCodec, PayloadCodec};
pub use engine::{ResponseCallback, Session};
pub use error::SessionError;
pub use relay::{LocalRelay, LocalTransport};
pub use store::{
    FileSessionStore, MemorySessionStore, PersistedSessionState, SessionRole, SessionStore,
};
pub use transport::{MessageHandler, StatusHandler, Transport, TransportBuilder, TransportStatus};
pub use ws::{WsTransport, WsTransportBuilder};
