//! Core wc protocol types.
//!
//! This crate provides:
//! - `Value`: a small tagged value tree used as the decrypted RPC body
//! - `MethodCall`: the closed set of remote calls exchanged by peers
//! - JSON-RPC mapping between the two (`rpc::encode` / `rpc::decode`)
//! - Session configuration and the `wc:` pairing URI
//! - The relay envelope (`Message`) carried by transports

#![forbid(unsafe_code)]

pub mod call;
pub mod config;
pub mod envelope;
pub mod rpc;
pub mod types;
pub mod value;

pub use call::{method, CallError, MethodCall, Response};
pub use config::{ConfigError, FullyQualifiedConfig, SessionConfig};
pub use envelope::{Message, MessageType};
pub use types::{PeerIdentity, PeerMetadata, RpcError, SessionParams};
pub use value::{Number, Value};

pub use wc_crypto::SymmetricKey;

/// JSON-RPC version tag written on every body.
pub const JSONRPC_VERSION: &str = "2.0";

/// Default protocol name of pairing URIs.
pub const DEFAULT_PROTOCOL: &str = "wc";

/// Default protocol version of pairing URIs.
pub const DEFAULT_VERSION: u32 = 1;
