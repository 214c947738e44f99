//! Relay envelope exchanged with the bridge.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Carries an encrypted payload to every subscriber of the topic.
    Pub,
    /// Registers interest in a topic; the payload is empty.
    Sub,
    #[serde(other)]
    Unknown,
}

/// `{"topic": .., "type": "pub"|"sub", "payload": ..}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub payload: String,
}

impl Message {
    pub fn publish(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            kind: MessageType::Pub,
            payload: payload.into(),
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            kind: MessageType::Sub,
            payload: String::new(),
        }
    }
}
