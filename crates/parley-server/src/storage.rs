//! In-memory storage behind the HTTP message list.

use crate::models::StoredMessage;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Memory storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryStorageError {
    /// No message with this ID.
    #[error("Message not found: {0}")]
    NotFound(u64),
}

/// Mutable in-memory message list with sequential IDs starting at 1.
#[derive(Debug)]
pub struct MemoryStorage {
    messages: DashMap<u64, StoredMessage>,
    next_id: AtomicU64,
}

impl MemoryStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// All messages ordered by ID.
    #[must_use]
    pub fn get_all(&self) -> Vec<StoredMessage> {
        let mut all: Vec<StoredMessage> = self.messages.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|m| m.id);
        all
    }

    /// Get a message by ID.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryStorageError::NotFound`] if the ID is unknown.
    pub fn get_by_id(&self, id: u64) -> Result<StoredMessage, MemoryStorageError> {
        self.messages
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(MemoryStorageError::NotFound(id))
    }

    /// Create a message with the next free ID.
    pub fn create(&self, username: &str, content: &str) -> StoredMessage {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = StoredMessage::new(id, username, content);
        self.messages.insert(id, message.clone());
        message
    }

    /// Replace a message's content and refresh its timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryStorageError::NotFound`] if the ID is unknown.
    pub fn update(&self, id: u64, content: &str) -> Result<StoredMessage, MemoryStorageError> {
        let mut entry = self
            .messages
            .get_mut(&id)
            .ok_or(MemoryStorageError::NotFound(id))?;
        entry.content = content.to_string();
        entry.timestamp = Utc::now();
        Ok(entry.value().clone())
    }

    /// Delete a message.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryStorageError::NotFound`] if the ID is unknown.
    pub fn delete(&self, id: u64) -> Result<(), MemoryStorageError> {
        self.messages
            .remove(&id)
            .map(|_| ())
            .ok_or(MemoryStorageError::NotFound(id))
    }

    /// Number of messages.
    #[must_use]
    pub fn count(&self) -> usize {
        self.messages.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}
