//! Append-only message store.

use crate::message::{current_timestamp, Message};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::trace;

/// Initial capacity reserved for stored messages.
const INITIAL_CAPACITY: usize = 100;

/// Message store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Sender or content is empty.
    #[error("Sender and content must not be empty")]
    EmptyMessageData,
}

/// An in-memory, append-only log of chat messages.
#[derive(Debug)]
pub struct MessageStore {
    messages: RwLock<Vec<Message>>,
}

impl MessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::with_capacity(INITIAL_CAPACITY)),
        }
    }

    /// Append a message.
    ///
    /// A zero timestamp is replaced with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EmptyMessageData`] if sender or content is empty.
    pub fn append(&self, mut message: Message) -> Result<(), StorageError> {
        if message.sender.is_empty() || message.content.is_empty() {
            return Err(StorageError::EmptyMessageData);
        }

        if message.timestamp == 0 {
            message.timestamp = current_timestamp();
        }

        trace!(sender = %message.sender, "Storing message");
        self.messages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }

    /// Return stored messages in insertion order, optionally only those from `sender`.
    #[must_use]
    pub fn query(&self, sender: Option<&str>) -> Vec<Message> {
        let messages = self.messages.read().unwrap_or_else(PoisonError::into_inner);
        match sender {
            Some(sender) if !sender.is_empty() => messages
                .iter()
                .filter(|m| m.sender == sender)
                .cloned()
                .collect(),
            _ => messages.clone(),
        }
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, content: &str, timestamp: i64) -> Message {
        Message {
            sender: sender.to_string(),
            recipient: String::new(),
            content: content.to_string(),
            broadcast: false,
            timestamp,
        }
    }

    #[test]
    fn test_append_rejects_empty_fields() {
        let store = MessageStore::new();
        assert_eq!(
            store.append(message("", "hi", 1)),
            Err(StorageError::EmptyMessageData)
        );
        assert_eq!(
            store.append(message("alice", "", 1)),
            Err(StorageError::EmptyMessageData)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_append_fills_missing_timestamp() {
        let store = MessageStore::new();
        store.append(message("alice", "hi", 0)).unwrap();
        store.append(message("alice", "again", 7)).unwrap();

        let stored = store.query(None);
        assert!(stored[0].timestamp > 0);
        assert_eq!(stored[1].timestamp, 7);
    }

    #[test]
    fn test_query_filters_by_sender() {
        let store = MessageStore::new();
        store.append(message("alice", "one", 1)).unwrap();
        store.append(message("bob", "two", 2)).unwrap();
        store.append(message("alice", "three", 3)).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.query(Some("")).len(), 3);

        let from_alice: Vec<String> = store
            .query(Some("alice"))
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(from_alice, vec!["one".to_string(), "three".to_string()]);

        assert!(store.query(Some("carol")).is_empty());
    }
}
