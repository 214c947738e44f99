//! JSON-RPC mapping between `MethodCall` and the decrypted body tree.
//!
//! # Wire Format
//!
//! ```text
//! request:  {"id": n, "jsonrpc": "2.0", "method": "...", "params": [...]}
//! response: {"id": n, "jsonrpc": "2.0", "result": any}
//!           {"id": n, "jsonrpc": "2.0", "error": {"code": n, "message": "..."}}
//! ```
//!
//! A body without `method` (or with `method: null`) is a response. Once the
//! `id` has been recovered, every other extraction failure is reported as
//! `CallError::InvalidRequest` carrying that id.

use wc_crypto::SymmetricKey;

use crate::call::{method, CallError, MethodCall, Response};
use crate::types::{PeerIdentity, PeerMetadata, RpcError, SessionParams};
use crate::value::{Map, Value};
use crate::JSONRPC_VERSION;

/// Value emitted for a transaction without a `value` field.
const DEFAULT_TX_VALUE: &str = "0x0";

/// Field extraction failure, promoted to `InvalidRequest` once the id is known.
#[derive(Debug)]
struct FieldError(String);

type FieldResult<T> = Result<T, FieldError>;

fn field_err(detail: impl Into<String>) -> FieldError {
    FieldError(detail.into())
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Map a call to its JSON-RPC body.
pub fn encode(call: &MethodCall) -> Value {
    let mut body = Map::new();
    body.insert("id".to_string(), Value::from(call.id()));
    body.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));

    let params = match call {
        MethodCall::SessionRequest { peer, .. } => vec![Value::Object(peer_to_map(peer))],
        MethodCall::SessionUpdate { params, .. } => vec![session_params_to_value(params)],
        MethodCall::ExchangeKey { next_key, peer, .. } => {
            let mut map = peer_to_map(peer);
            map.insert("nextKey".to_string(), Value::from(next_key.to_hex()));
            vec![Value::Object(map)]
        }
        MethodCall::SendTransaction {
            from,
            to,
            nonce,
            gas_price,
            gas_limit,
            value,
            data,
            ..
        } => {
            let mut tx = Map::new();
            tx.insert("from".to_string(), Value::from(from.as_str()));
            tx.insert("to".to_string(), Value::from(to.as_str()));
            insert_opt(&mut tx, "nonce", nonce);
            insert_opt(&mut tx, "gasPrice", gas_price);
            insert_opt(&mut tx, "gas", gas_limit);
            tx.insert("value".to_string(), Value::from(value.as_str()));
            tx.insert("data".to_string(), Value::from(data.as_str()));
            vec![Value::Object(tx)]
        }
        MethodCall::SignMessage {
            address, message, ..
        } => vec![Value::from(address.as_str()), Value::from(message.as_str())],
        MethodCall::PersonalSignMessage {
            address, message, ..
        } => vec![Value::from(message.as_str()), Value::from(address.as_str())],
        MethodCall::Custom { params, .. } => params.clone(),
        MethodCall::Response(response) => {
            match &response.result {
                Ok(result) => {
                    body.insert("result".to_string(), result.clone());
                }
                Err(err) => {
                    let mut error = Map::new();
                    error.insert("code".to_string(), Value::from(err.code));
                    error.insert("message".to_string(), Value::from(err.message.as_str()));
                    body.insert("error".to_string(), Value::Object(error));
                }
            }
            return Value::Object(body);
        }
    };

    if let Some(name) = call.method() {
        body.insert("method".to_string(), Value::from(name));
    }
    body.insert("params".to_string(), Value::Array(params));
    Value::Object(body)
}

/// Encode handshake/update params. `peerId`/`peerMeta` are flattened into
/// the same object, absent fields are omitted.
pub fn session_params_to_value(params: &SessionParams) -> Value {
    let mut map = match &params.peer {
        Some(peer) => peer_to_map(peer),
        None => Map::new(),
    };
    map.insert("approved".to_string(), Value::from(params.approved));
    if let Some(chain_id) = params.chain_id {
        map.insert("chainId".to_string(), Value::from(chain_id));
    }
    if let Some(accounts) = &params.accounts {
        map.insert("accounts".to_string(), Value::from(accounts.clone()));
    }
    Value::Object(map)
}

fn peer_to_map(peer: &PeerIdentity) -> Map {
    let mut map = Map::new();
    map.insert("peerId".to_string(), Value::from(peer.id.as_str()));
    if let Some(meta) = &peer.metadata {
        map.insert("peerMeta".to_string(), metadata_to_value(meta));
    }
    map
}

fn metadata_to_value(meta: &PeerMetadata) -> Value {
    let mut map = Map::new();
    insert_opt(&mut map, "url", &meta.url);
    insert_opt(&mut map, "name", &meta.name);
    insert_opt(&mut map, "description", &meta.description);
    if let Some(icons) = &meta.icons {
        map.insert("icons".to_string(), Value::from(icons.clone()));
    }
    Value::Object(map)
}

fn insert_opt(map: &mut Map, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        map.insert(key.to_string(), Value::from(value.as_str()));
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Classify a JSON-RPC body into a call.
pub fn decode(body: Value) -> Result<MethodCall, CallError> {
    let Value::Object(body) = body else {
        return Err(CallError::Malformed("body is not an object".to_string()));
    };
    let id = body
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| CallError::Malformed("missing or non-integer id".to_string()))?;

    decode_with_id(id, &body).map_err(|FieldError(detail)| CallError::InvalidRequest { id, detail })
}

fn decode_with_id(id: u64, body: &Map) -> FieldResult<MethodCall> {
    let name = match body.get("method") {
        None | Some(Value::Null) => return decode_response(id, body),
        Some(Value::String(name)) => name.as_str(),
        Some(_) => return Err(field_err("method is not a string")),
    };

    let call = match name {
        method::SESSION_REQUEST => {
            let first = first_object_param(body)?;
            MethodCall::SessionRequest {
                id,
                peer: peer_from_map(first)?.ok_or_else(|| field_err("peerId missing"))?,
            }
        }
        method::SESSION_UPDATE => MethodCall::SessionUpdate {
            id,
            params: session_params_from_map(first_object_param(body)?)?,
        },
        method::EXCHANGE_KEY => {
            let first = first_object_param(body)?;
            let next_key = require_str(first, "nextKey")?;
            MethodCall::ExchangeKey {
                id,
                next_key: SymmetricKey::from_hex(next_key)
                    .map_err(|_| field_err("nextKey is not a 32-byte hex key"))?,
                peer: peer_from_map(first)?.ok_or_else(|| field_err("peerId missing"))?,
            }
        }
        method::SEND_TRANSACTION => decode_transaction(id, first_object_param(body)?)?,
        method::SIGN => {
            let params = params(body)?;
            MethodCall::SignMessage {
                id,
                address: string_param(params, 0, "address")?,
                message: string_param(params, 1, "message")?,
            }
        }
        method::PERSONAL_SIGN => {
            let params = params(body)?;
            MethodCall::PersonalSignMessage {
                id,
                message: string_param(params, 0, "message")?,
                address: string_param(params, 1, "address")?,
            }
        }
        other => MethodCall::Custom {
            id,
            method: other.to_string(),
            params: match body.get("params") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items.clone(),
                Some(_) => return Err(field_err("params is not a list")),
            },
        },
    };
    Ok(call)
}

fn decode_response(id: u64, body: &Map) -> FieldResult<MethodCall> {
    let result = match (body.get("error"), body.get("result")) {
        (Some(error), _) if !error.is_null() => Err(rpc_error_from_value(error)?),
        (_, Some(result)) => Ok(result.clone()),
        _ => return Err(field_err("no result or error")),
    };
    Ok(MethodCall::Response(Response { id, result }))
}

fn rpc_error_from_value(error: &Value) -> FieldResult<RpcError> {
    let code = error
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| field_err("error code missing"))?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| field_err("error message missing"))?;
    Ok(RpcError::new(code, message))
}

fn decode_transaction(id: u64, tx: &Map) -> FieldResult<MethodCall> {
    let nonce = match tx.get("nonce") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(
            n.as_i64()
                .ok_or_else(|| field_err("nonce is not an integer"))?
                .to_string(),
        ),
        Some(_) => return Err(field_err("nonce has the wrong type")),
    };
    // "gasLimit" is the older key name; "gas" wins when both are set.
    let gas_limit = match optional_str(tx, "gas")? {
        Some(gas) => Some(gas),
        None => optional_str(tx, "gasLimit")?,
    };

    Ok(MethodCall::SendTransaction {
        id,
        from: require_str(tx, "from")?.to_string(),
        to: require_str(tx, "to")?.to_string(),
        nonce,
        gas_price: optional_str(tx, "gasPrice")?,
        gas_limit,
        value: optional_str(tx, "value")?.unwrap_or_else(|| DEFAULT_TX_VALUE.to_string()),
        data: require_str(tx, "data")?.to_string(),
    })
}

/// Decode handshake/update params (the inverse of [`session_params_to_value`]).
pub fn session_params_from_value(value: &Value) -> Result<SessionParams, String> {
    let map = value
        .as_object()
        .ok_or_else(|| "session params are not an object".to_string())?;
    session_params_from_map(map).map_err(|FieldError(detail)| detail)
}

fn session_params_from_map(map: &Map) -> FieldResult<SessionParams> {
    let approved = map
        .get("approved")
        .and_then(Value::as_bool)
        .ok_or_else(|| field_err("approved missing"))?;
    let chain_id = match map.get("chainId") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_i64()
                .ok_or_else(|| field_err("chainId is not an integer"))?,
        ),
    };
    let accounts = match map.get("accounts") {
        None | Some(Value::Null) => None,
        Some(value) => Some(string_list(value, "accounts")?),
    };

    Ok(SessionParams {
        approved,
        chain_id,
        accounts,
        peer: peer_from_map(map)?,
    })
}

fn peer_from_map(map: &Map) -> FieldResult<Option<PeerIdentity>> {
    let Some(id) = optional_str(map, "peerId")? else {
        return Ok(None);
    };
    let metadata = match map.get("peerMeta") {
        None | Some(Value::Null) => None,
        Some(Value::Object(meta)) => Some(metadata_from_map(meta)?),
        Some(_) => return Err(field_err("peerMeta is not an object")),
    };
    Ok(Some(PeerIdentity { id, metadata }))
}

fn metadata_from_map(map: &Map) -> FieldResult<PeerMetadata> {
    let icons = match map.get("icons") {
        None | Some(Value::Null) => None,
        Some(value) => Some(string_list(value, "icons")?),
    };
    Ok(PeerMetadata {
        url: optional_str(map, "url")?,
        name: optional_str(map, "name")?,
        description: optional_str(map, "description")?,
        icons,
    })
}

fn params(body: &Map) -> FieldResult<&[Value]> {
    body.get("params")
        .and_then(Value::as_array)
        .ok_or_else(|| field_err("params missing"))
}

fn first_object_param(body: &Map) -> FieldResult<&Map> {
    params(body)?
        .first()
        .and_then(Value::as_object)
        .ok_or_else(|| field_err("invalid params"))
}

fn string_param(params: &[Value], index: usize, name: &str) -> FieldResult<String> {
    params
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| field_err(format!("missing {}", name)))
}

fn require_str<'a>(map: &'a Map, key: &str) -> FieldResult<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| field_err(format!("{} key missing", key)))
}

fn optional_str(map: &Map, key: &str) -> FieldResult<Option<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(field_err(format!("{} is not a string", key))),
    }
}

fn string_list(value: &Value, name: &str) -> FieldResult<Vec<String>> {
    value
        .as_array()
        .ok_or_else(|| field_err(format!("{} is not a list", name)))?
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| field_err(format!("{} contains a non-string", name)))
        })
        .collect()
}
