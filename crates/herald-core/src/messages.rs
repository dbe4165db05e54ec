//! The wire and bus payload unit.
//!
//! Every frame sent to a client and every payload published on the bus is a
//! [`Message`]:
//!
//! ```json
//! {
//!   "type": "notification",
//!   "message": "Hello",
//!   "timestamp": "2026-01-01T00:00:00Z",
//!   "source": "user"
//! }
//! ```
//!
//! `source` and `connection_count` are omitted when absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{SHUTDOWN_NOTICE_TEXT, WELCOME_TEXT};

/// Closed set of message kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// First frame on every accepted connection.
    Welcome,
    /// A notification injected by a client, the API, or the system.
    Notification,
    /// Sent once to a client when the worker starts shutting down.
    ShutdownNotice,
    /// A bus message forwarded to a client.
    Echo,
}

/// Where a notification originated. Informational only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// The HTTP notify endpoint.
    Api,
    /// The periodic notifier.
    System,
    /// A connected client.
    User,
}

/// A relay message. Immutable once built; construct via the named constructors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Text or structured content.
    pub message: Value,
    /// When the message was constructed.
    pub timestamp: DateTime<Utc>,
    /// Origin tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Worker connection count at the time of sending (periodic notifications).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_count: Option<usize>,
}

impl Message {
    fn new(kind: MessageType, message: Value) -> Self {
        Self {
            kind,
            message,
            timestamp: Utc::now(),
            source: None,
            connection_count: None,
        }
    }

    /// The greeting sent when a relay session opens.
    pub fn welcome() -> Self {
        Self::new(MessageType::Welcome, Value::String(WELCOME_TEXT.into()))
    }

    /// A notification to broadcast on the shared channel.
    pub fn notification(text: impl Into<String>, source: Source) -> Self {
        Self {
            source: Some(source),
            ..Self::new(MessageType::Notification, Value::String(text.into()))
        }
    }

    /// The notice sent to a client before its relay drains for shutdown.
    pub fn shutdown_notice() -> Self {
        Self::new(
            MessageType::ShutdownNotice,
            Value::String(SHUTDOWN_NOTICE_TEXT.into()),
        )
    }

    /// A bus payload forwarded to a client, stamped with a fresh timestamp.
    pub fn echo(payload: Value) -> Self {
        Self::new(MessageType::Echo, payload)
    }

    /// Attach the current connection count.
    #[must_use]
    pub fn with_connection_count(mut self, count: usize) -> Self {
        self.connection_count = Some(count);
        self
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
