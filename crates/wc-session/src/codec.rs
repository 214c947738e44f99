//! Payload codec: `MethodCall` <-> encrypted wire string.

use thiserror::Error;
use wc_core::{rpc, CallError, MethodCall, Value};
use wc_crypto::{decrypt, encrypt, CryptoError, EncryptedPayload, SymmetricKey};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("json error: {0}")]
    Json(String),

    #[error(transparent)]
    Call(#[from] CallError),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Json(err.to_string())
    }
}

pub trait PayloadCodec: Send + Sync {
    /// Encode and encrypt a call under `key`.
    fn prepare(&self, call: &MethodCall, key: &SymmetricKey) -> Result<String, CodecError>;

    /// Decrypt and classify a wire payload.
    fn parse(&self, payload: &str, key: &SymmetricKey) -> Result<MethodCall, CodecError>;
}

/// JSON bodies inside JSON `{data, iv, hmac}` envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloadCodec;

impl PayloadCodec for JsonPayloadCodec {
    fn prepare(&self, call: &MethodCall, key: &SymmetricKey) -> Result<String, CodecError> {
        let body = serde_json::to_vec(&rpc::encode(call))?;
        let payload = encrypt(&body, key)?;
        Ok(serde_json::to_string(&payload)?)
    }

    fn parse(&self, payload: &str, key: &SymmetricKey) -> Result<MethodCall, CodecError> {
        let payload: EncryptedPayload = serde_json::from_str(payload)?;
        let body = decrypt(&payload, key)?;
        let body: Value = serde_json::from_slice(&body)?;
        Ok(rpc::decode(body)?)
    }
}
