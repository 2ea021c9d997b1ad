//! Messages carried by the in-process bus

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A published payload together with its subject and bus metadata.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Unique message ID
    pub id: Uuid,
    /// When the message was published
    pub timestamp: DateTime<Utc>,
    /// Subject the message was published on
    pub subject: String,
    /// Raw payload bytes
    pub payload: Bytes,
}

impl BusMessage {
    /// Create a new message with auto-generated ID and timestamp
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            subject: subject.into(),
            payload: payload.into(),
        }
    }
}

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub subject: String,
    pub payload: Bytes,
}

impl From<BusMessage> for InboundMessage {
    fn from(message: BusMessage) -> Self {
        Self {
            subject: message.subject,
            payload: message.payload,
        }
    }
}
