//! Session engine errors.

use thiserror::Error;
use wc_core::{CallError, ConfigError};
use wc_crypto::CryptoError;

use crate::codec::CodecError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Classified protocol failure of a call.
    #[error(transparent)]
    Call(#[from] CallError),

    /// An inbound payload failed HMAC verification or decryption.
    #[error("payload authentication failed")]
    Authentication,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("client id {requested} does not match stored client id {stored}")]
    ClientIdMismatch { stored: String, requested: String },

    /// No explicit topic was given and no peer is known yet.
    #[error("session has no peer yet")]
    NoPeer,

    #[error("a key exchange is already in progress")]
    RotationInProgress,

    #[error("session is closed")]
    Closed,
}

impl From<CodecError> for SessionError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Crypto(CryptoError::Authentication) => SessionError::Authentication,
            CodecError::Call(call) => SessionError::Call(call),
            other => SessionError::Codec(other.to_string()),
        }
    }
}

impl From<wc_common::Error> for SessionError {
    fn from(err: wc_common::Error) -> Self {
        SessionError::Store(err.to_string())
    }
}
