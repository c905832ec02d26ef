//! Bus message envelope
//!
//! Every payload published on the bus travels inside a `BusMessage`,
//! both in memory and on the gossip wire.

use super::TopicPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope protocol version
pub const ENVELOPE_VERSION: u32 = 1;

/// A published message with its envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Unique message ID
    pub id: String,
    /// Destination topic
    pub topic: TopicPath,
    /// Opaque payload (JSON text for every EML message)
    pub data: Vec<u8>,
    /// When the message was published
    pub publish_time: DateTime<Utc>,
    /// Protocol version
    pub version: u32,
}

impl BusMessage {
    pub fn new(topic: TopicPath, data: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic,
            data,
            publish_time: Utc::now(),
            version: ENVELOPE_VERSION,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
