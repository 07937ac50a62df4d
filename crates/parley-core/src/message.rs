//! Chat message types for Parley.
//!
//! A [`Message`] is the unit the broker routes and the store records.
//! Messages built from user input should go through [`validate`].

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Validation errors for message fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Sender is empty.
    #[error("Invalid sender: must be at least 1 character")]
    InvalidSender,

    /// Content is empty.
    #[error("Invalid content: must be at least 1 character")]
    InvalidContent,

    /// Timestamp is zero or negative.
    #[error("Invalid timestamp: must be greater than 0")]
    InvalidTimestamp,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// A chat message.
///
/// When `broadcast` is set the message goes to every registered subscriber
/// and `recipient` is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sending user ID.
    pub sender: String,
    /// Receiving user ID for directed messages.
    #[serde(default)]
    pub recipient: String,
    /// Message body.
    pub content: String,
    /// Deliver to all subscribers instead of `recipient`.
    #[serde(default)]
    pub broadcast: bool,
    /// Creation time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    /// Create a directed message stamped with the current time.
    #[must_use]
    pub fn direct(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            content: content.into(),
            broadcast: false,
            timestamp: current_timestamp(),
        }
    }

    /// Create a broadcast message stamped with the current time.
    #[must_use]
    pub fn broadcast_from(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            recipient: String::new(),
            content: content.into(),
            broadcast: true,
            timestamp: current_timestamp(),
        }
    }

    /// Address the message to a single recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self.broadcast = false;
        self
    }

    /// Mark the message for delivery to every subscriber.
    #[must_use]
    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Content size in bytes.
    #[must_use]
    pub fn content_size(&self) -> usize {
        self.content.len()
    }
}

/// Validate raw message fields and build a directed message with no recipient.
///
/// Content is checked first, then sender, then timestamp.
///
/// # Errors
///
/// Returns the first [`ValidationError`] encountered.
pub fn validate(
    sender: impl Into<String>,
    content: impl Into<String>,
    timestamp: i64,
) -> Result<Message, ValidationError> {
    let sender = sender.into();
    let content = content.into();

    if content.is_empty() {
        return Err(ValidationError::InvalidContent);
    }
    if sender.is_empty() {
        return Err(ValidationError::InvalidSender);
    }
    if timestamp <= 0 {
        return Err(ValidationError::InvalidTimestamp);
    }

    Ok(Message {
        sender,
        recipient: String::new(),
        content,
        broadcast: false,
        timestamp,
    })
}
