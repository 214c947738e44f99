//! Session data model shared by calls, persisted state and observers.

use serde::{Deserialize, Serialize};

/// Self-description a party presents during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icons: Option<Vec<String>>,
}

impl PeerMetadata {
    /// Metadata carrying only a display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// A party of the session. `id` doubles as the party's own relay topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PeerMetadata>,
}

impl PeerIdentity {
    pub fn new(id: impl Into<String>, metadata: Option<PeerMetadata>) -> Self {
        Self {
            id: id.into(),
            metadata,
        }
    }
}

/// Handshake answer and session update payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub approved: bool,
    pub chain_id: Option<i64>,
    pub accounts: Option<Vec<String>>,
    pub peer: Option<PeerIdentity>,
}

impl SessionParams {
    /// Params that close or decline a session.
    pub fn rejected() -> Self {
        Self {
            approved: false,
            chain_id: None,
            accounts: None,
            peer: None,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
