//! Remote method calls.
//!
//! `MethodCall` is the closed set of calls the engine understands. Every
//! variant carries a 64-bit correlation id; a `Response` answers the call
//! with the same id.

use thiserror::Error;
use wc_crypto::SymmetricKey;

use crate::types::{PeerIdentity, RpcError, SessionParams};
use crate::value::Value;

/// JSON-RPC method names.
pub mod method {
    pub const SESSION_REQUEST: &str = "wc_sessionRequest";
    pub const SESSION_UPDATE: &str = "wc_sessionUpdate";
    pub const EXCHANGE_KEY: &str = "wc_exchangeKey";
    pub const SEND_TRANSACTION: &str = "eth_sendTransaction";
    /// Plain message signing, params `[address, message]`.
    pub const SIGN: &str = "eth_sign";
    /// Prefixed message signing, params `[message, address]`.
    pub const PERSONAL_SIGN: &str = "personal_sign";
}

/// Answer to a previously sent call.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub result: Result<Value, RpcError>,
}

impl Response {
    pub fn ok(id: u64, result: impl Into<Value>) -> Self {
        Self {
            id,
            result: Ok(result.into()),
        }
    }

    pub fn error(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Err(RpcError::new(code, message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodCall {
    SessionRequest {
        id: u64,
        peer: PeerIdentity,
    },
    SessionUpdate {
        id: u64,
        params: SessionParams,
    },
    ExchangeKey {
        id: u64,
        next_key: SymmetricKey,
        peer: PeerIdentity,
    },
    SendTransaction {
        id: u64,
        from: String,
        to: String,
        nonce: Option<String>,
        gas_price: Option<String>,
        gas_limit: Option<String>,
        value: String,
        data: String,
    },
    SignMessage {
        id: u64,
        address: String,
        message: String,
    },
    PersonalSignMessage {
        id: u64,
        address: String,
        message: String,
    },
    Custom {
        id: u64,
        method: String,
        params: Vec<Value>,
    },
    Response(Response),
}

impl MethodCall {
    pub fn id(&self) -> u64 {
        match self {
            MethodCall::SessionRequest { id, .. }
            | MethodCall::SessionUpdate { id, .. }
            | MethodCall::ExchangeKey { id, .. }
            | MethodCall::SendTransaction { id, .. }
            | MethodCall::SignMessage { id, .. }
            | MethodCall::PersonalSignMessage { id, .. }
            | MethodCall::Custom { id, .. } => *id,
            MethodCall::Response(response) => response.id,
        }
    }

    /// JSON-RPC method name; `None` for responses.
    pub fn method(&self) -> Option<&str> {
        match self {
            MethodCall::SessionRequest { .. } => Some(method::SESSION_REQUEST),
            MethodCall::SessionUpdate { .. } => Some(method::SESSION_UPDATE),
            MethodCall::ExchangeKey { .. } => Some(method::EXCHANGE_KEY),
            MethodCall::SendTransaction { .. } => Some(method::SEND_TRANSACTION),
            MethodCall::SignMessage { .. } => Some(method::SIGN),
            MethodCall::PersonalSignMessage { .. } => Some(method::PERSONAL_SIGN),
            MethodCall::Custom { method, .. } => Some(method),
            MethodCall::Response(_) => None,
        }
    }

    /// Account an address-bearing call acts on.
    pub fn account(&self) -> Option<&str> {
        match self {
            MethodCall::SendTransaction { from, .. } => Some(from),
            MethodCall::SignMessage { address, .. }
            | MethodCall::PersonalSignMessage { address, .. } => Some(address),
            MethodCall::SessionRequest { .. }
            | MethodCall::SessionUpdate { .. }
            | MethodCall::ExchangeKey { .. }
            | MethodCall::Custom { .. }
            | MethodCall::Response(_) => None,
        }
    }
}

/// Classified failures of an inbound call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The body decoded but a field is missing or has the wrong shape.
    #[error("invalid request {id}: {detail}")]
    InvalidRequest { id: u64, detail: String },

    /// An address-bearing call names an account outside the approved set.
    #[error("invalid account request {id}: {address}")]
    InvalidAccount { id: u64, address: String },

    /// No correlation id could be recovered from the body.
    #[error("malformed rpc body: {0}")]
    Malformed(String),
}

impl CallError {
    pub const INVALID_REQUEST_CODE: i64 = 23;
    pub const INVALID_ACCOUNT_CODE: i64 = 3141;

    /// Correlation id to answer, when one was recovered.
    pub fn id(&self) -> Option<u64> {
        match self {
            CallError::InvalidRequest { id, .. } | CallError::InvalidAccount { id, .. } => {
                Some(*id)
            }
            CallError::Malformed(_) => None,
        }
    }

    /// JSON-RPC error code sent back to the peer.
    pub fn code(&self) -> Option<i64> {
        match self {
            CallError::InvalidRequest { .. } => Some(Self::INVALID_REQUEST_CODE),
            CallError::InvalidAccount { .. } => Some(Self::INVALID_ACCOUNT_CODE),
            CallError::Malformed(_) => None,
        }
    }

    /// The error response answering the offending call, if it can be addressed.
    pub fn to_response(&self) -> Option<Response> {
        let id = self.id()?;
        let code = self.code()?;
        let message = match self {
            CallError::InvalidRequest { detail, .. } => format!("Invalid request: {}", detail),
            CallError::InvalidAccount { address, .. } => {
                format!("Invalid account request: {}", address)
            }
            CallError::Malformed(detail) => detail.clone(),
        };
        Some(Response::error(id, code, message))
    }
}
