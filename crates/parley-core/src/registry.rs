//! Subscriber registry for Parley.
//!
//! Maps user IDs to the sending half of that user's delivery channel.

use crate::message::Message;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// The sending half of a subscriber's delivery channel.
pub type SubscriberChannel = mpsc::Sender<Arc<Message>>;

/// The receiving half handed to the subscriber's consumer.
pub type SubscriberReceiver = mpsc::Receiver<Arc<Message>>;

/// Create a bounded subscriber channel.
#[must_use]
pub fn subscriber_channel(capacity: usize) -> (SubscriberChannel, SubscriberReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Registry of subscribed users.
///
/// Holds at most one channel per user. Dropping an entry drops the registry's
/// sender, which closes the channel once no other clone is alive.
#[derive(Debug, Default)]
pub struct Registry {
    users: DashMap<String, SubscriberChannel>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user, replacing any existing entry.
    ///
    /// Returns `true` if a previous channel was replaced (and closed).
    pub fn register(&self, user_id: impl Into<String>, channel: SubscriberChannel) -> bool {
        let user_id = user_id.into();
        let replaced = self.users.insert(user_id.clone(), channel).is_some();
        if replaced {
            debug!(user = %user_id, "Replaced existing subscriber channel");
        } else {
            debug!(user = %user_id, "User registered");
        }
        replaced
    }

    /// Unregister a user, closing its channel.
    ///
    /// Returns `true` if the user was registered.
    pub fn unregister(&self, user_id: &str) -> bool {
        let removed = self.users.remove(user_id).is_some();
        if removed {
            debug!(user = %user_id, "User unregistered");
        }
        removed
    }

    /// Unregister a user only if `channel` is still its registered channel.
    ///
    /// Lets a consumer leave without removing a newer registration for the
    /// same user. Returns `true` if the entry was removed.
    pub fn unregister_channel(&self, user_id: &str, channel: &SubscriberChannel) -> bool {
        let removed = self
            .users
            .remove_if(user_id, |_, current| current.same_channel(channel))
            .is_some();
        if removed {
            debug!(user = %user_id, "User unregistered");
        }
        removed
    }

    /// Look up a user's channel.
    ///
    /// The returned sender is a clone, so no registry lock is held while it is used.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<SubscriberChannel> {
        self.users.get(user_id).map(|entry| entry.value().clone())
    }

    /// Snapshot every registered channel.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, SubscriberChannel)> {
        self.users
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Check if a user is registered.
    #[must_use]
    pub fn is_registered(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check if no users are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// All registered user IDs.
    #[must_use]
    pub fn user_ids(&self) -> Vec<String> {
        self.users.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister() {
        let registry = Registry::new();
        let (tx, _rx) = subscriber_channel(1);

        assert!(!registry.register("a", tx));
        assert!(registry.is_registered("a"));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("a"));
        assert!(!registry.is_registered("a"));
        assert!(registry.is_empty());

        // Unknown users are a no-op
        assert!(!registry.unregister("a"));
    }

    #[tokio::test]
    async fn test_unregister_closes_channel() {
        let registry = Registry::new();
        let (tx, mut rx) = subscriber_channel(1);

        registry.register("a", tx);
        registry.unregister("a");

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_replace_closes_previous_channel() {
        let registry = Registry::new();
        let (old_tx, mut old_rx) = subscriber_channel(1);
        let (new_tx, _new_rx) = subscriber_channel(1);

        registry.register("a", old_tx);
        assert!(registry.register("a", new_tx));
        assert_eq!(registry.len(), 1);

        assert!(old_rx.recv().await.is_none());
    }

    #[test]
    fn test_unregister_channel_keeps_newer_registration() {
        let registry = Registry::new();
        let (old_tx, _old_rx) = subscriber_channel(1);
        let (new_tx, _new_rx) = subscriber_channel(1);

        registry.register("a", old_tx.clone());
        registry.register("a", new_tx.clone());

        assert!(!registry.unregister_channel("a", &old_tx));
        assert!(registry.is_registered("a"));

        assert!(registry.unregister_channel("a", &new_tx));
        assert!(!registry.is_registered("a"));
    }

    #[test]
    fn test_snapshot() {
        let registry = Registry::new();
        let (tx1, _rx1) = subscriber_channel(1);
        let (tx2, _rx2) = subscriber_channel(1);
        registry.register("a", tx1);
        registry.register("b", tx2);

        let mut ids: Vec<String> = registry.snapshot().into_iter().map(|(id, _)| id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
