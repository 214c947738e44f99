//! Session configuration and the pairing URI.
//!
//! ```text
//! wc:<handshakeTopic>@<version>?bridge=<url-encoded bridge>&key=<hex key>
//! wc:<handshakeTopic>@<version>
//! ```
//!
//! The short form only re-foregrounds an application, so it carries neither
//! bridge nor key. Only a `FullyQualifiedConfig` can start a session.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;
use uuid::Uuid;
use wc_crypto::SymmetricKey;

use crate::{DEFAULT_PROTOCOL, DEFAULT_VERSION};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("uri has no protocol separator")]
    MissingProtocol,

    #[error("uri has no handshake topic")]
    MissingTopic,

    #[error("uri has no version")]
    MissingVersion,

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("missing session parameter: {0}")]
    MissingParam(&'static str),

    #[error("key is not a 32-byte hex string")]
    InvalidKey,
}

/// Parsed pairing URI, either form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub handshake_topic: String,
    pub bridge: Option<String>,
    pub key: Option<SymmetricKey>,
    pub protocol: String,
    pub version: u32,
}

impl SessionConfig {
    pub fn from_uri(uri: &str) -> Result<Self, ConfigError> {
        let (protocol, rest) = uri.split_once(':').ok_or(ConfigError::MissingProtocol)?;
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        let (topic, version) = path.split_once('@').ok_or(ConfigError::MissingVersion)?;
        if topic.is_empty() {
            return Err(ConfigError::MissingTopic);
        }
        if version.is_empty() {
            return Err(ConfigError::MissingVersion);
        }
        let version = version
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidVersion(version.to_string()))?;

        let mut bridge = None;
        let mut key = None;
        if let Some(query) = query {
            for (name, value) in form_urlencoded::parse(query.as_bytes()) {
                match name.as_ref() {
                    "bridge" => bridge = Some(value.into_owned()),
                    "key" => {
                        key = Some(SymmetricKey::from_hex(&value).map_err(|_| ConfigError::InvalidKey)?)
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            handshake_topic: topic.to_string(),
            bridge,
            key,
            protocol: protocol.to_string(),
            version,
        })
    }

    /// Canonical URI. The query string is written only when bridge or key is set.
    pub fn to_uri(&self) -> String {
        let mut uri = format!("{}:{}@{}", self.protocol, self.handshake_topic, self.version);
        if self.bridge.is_some() || self.key.is_some() {
            let mut query = form_urlencoded::Serializer::new(String::new());
            if let Some(bridge) = &self.bridge {
                query.append_pair("bridge", bridge);
            }
            if let Some(key) = &self.key {
                query.append_pair("key", &key.to_hex());
            }
            uri.push('?');
            uri.push_str(&query.finish());
        }
        uri
    }

    /// Require bridge and key.
    pub fn into_full(self) -> Result<FullyQualifiedConfig, ConfigError> {
        Ok(FullyQualifiedConfig {
            bridge: self.bridge.ok_or(ConfigError::MissingParam("bridge"))?,
            key: self.key.ok_or(ConfigError::MissingParam("key"))?,
            handshake_topic: self.handshake_topic,
            protocol: self.protocol,
            version: self.version,
        })
    }
}

impl FromStr for SessionConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_uri(s)
    }
}

/// Configuration with every parameter a running session needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullyQualifiedConfig {
    pub handshake_topic: String,
    pub bridge: String,
    pub key: SymmetricKey,
    pub protocol: String,
    pub version: u32,
}

impl FullyQualifiedConfig {
    /// Fresh offer: random topic and key on the given bridge.
    pub fn generate(bridge: impl Into<String>) -> Self {
        Self {
            handshake_topic: Uuid::new_v4().to_string(),
            bridge: bridge.into(),
            key: SymmetricKey::generate(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            version: DEFAULT_VERSION,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, ConfigError> {
        SessionConfig::from_uri(uri)?.into_full()
    }

    pub fn to_uri(&self) -> String {
        SessionConfig::from(self.clone()).to_uri()
    }
}

impl From<FullyQualifiedConfig> for SessionConfig {
    fn from(config: FullyQualifiedConfig) -> Self {
        Self {
            handshake_topic: config.handshake_topic,
            bridge: Some(config.bridge),
            key: Some(config.key),
            protocol: config.protocol,
            version: config.version,
        }
    }
}
