//! In-process chat message broker.
//!
//! The broker accepts messages from any number of producers, queues them in a
//! bounded FIFO and hands them to a single dispatch loop, which routes each
//! one to its recipient or to every registered subscriber.
//!
//! ```text
//!  send_message ──▶ [ bounded queue ] ──▶ dispatch loop ──▶ subscriber channels
//!                                             │
//!                                             ▼
//!                                          Registry
//! ```
//!
//! The broker is bound to an external [`CancellationToken`]. Cancelling it
//! stops the dispatch loop, rejects new submissions and fires the completion
//! signal observed through [`Broker::stopped`].

use crate::dispatch::Dispatcher;
use crate::message::Message;
use crate::registry::{Registry, SubscriberChannel};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default capacity of the input queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Broker errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker no longer accepts messages.
    #[error("Broker is shutting down")]
    ShuttingDown,

    /// The input queue is full.
    #[error("Broker queue is full")]
    QueueFull,

    /// The dispatch loop was already started.
    #[error("Broker is already running")]
    AlreadyRunning,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Capacity of the input queue.
    pub queue_capacity: usize,
    /// Skip the sender's own channel when broadcasting.
    pub exclude_sender_from_broadcast: bool,
    /// Upper bound on waiting for room in one subscriber channel.
    ///
    /// `None` waits indefinitely, so a stalled subscriber blocks the loop.
    pub delivery_timeout: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            exclude_sender_from_broadcast: false,
            delivery_timeout: None,
        }
    }
}

/// Counters shared with the dispatch loop.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) accepted: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) dropped: AtomicU64,
}

/// Broker statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerStats {
    /// Messages accepted by the ingress gate.
    pub accepted: u64,
    /// Copies handed to subscriber channels.
    pub delivered: u64,
    /// Messages or copies dropped (unknown recipient, closed or slow subscriber).
    pub dropped: u64,
    /// Currently registered subscribers.
    pub subscriber_count: usize,
}

/// The chat message broker.
pub struct Broker {
    /// Producer side of the input queue.
    queue: mpsc::Sender<Message>,
    /// Consumer side, taken by the first call to [`Broker::run`].
    pending: Mutex<Option<mpsc::Receiver<Message>>>,
    /// Registered subscribers.
    registry: Arc<Registry>,
    /// External shutdown request.
    shutdown: CancellationToken,
    /// Fired once the dispatch loop has exited.
    stopped: CancellationToken,
    counters: Arc<Counters>,
    config: BrokerConfig,
}

impl Broker {
    /// Create a broker with default configuration bound to `shutdown`.
    #[must_use]
    pub fn new(shutdown: CancellationToken) -> Self {
        Self::with_config(shutdown, BrokerConfig::default())
    }

    /// Create a broker with custom configuration bound to `shutdown`.
    #[must_use]
    pub fn with_config(shutdown: CancellationToken, config: BrokerConfig) -> Self {
        info!("Creating broker with config: {:?}", config);
        let (queue, pending) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            queue,
            pending: Mutex::new(Some(pending)),
            registry: Arc::new(Registry::new()),
            shutdown,
            stopped: CancellationToken::new(),
            counters: Arc::new(Counters::default()),
            config,
        }
    }

    /// Start the dispatch loop on the current Tokio runtime.
    ///
    /// Only one loop may run per broker; the returned handle completes when
    /// the loop exits.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AlreadyRunning`] on every call after the first.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn run(&self) -> Result<JoinHandle<()>, BrokerError> {
        let queue = self
            .pending
            .lock()
            .map_err(|_| BrokerError::Internal("dispatch queue lock poisoned".to_string()))?
            .take()
            .ok_or(BrokerError::AlreadyRunning)?;

        let dispatcher = Dispatcher {
            queue,
            registry: Arc::clone(&self.registry),
            shutdown: self.shutdown.clone(),
            stopped: self.stopped.clone(),
            counters: Arc::clone(&self.counters),
            config: self.config.clone(),
        };

        Ok(tokio::spawn(dispatcher.run()))
    }

    /// Submit a message for routing.
    ///
    /// Waits for room when the queue is full. Success means the message was
    /// queued, not that it will be delivered.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ShuttingDown`] if shutdown was requested before
    /// or while waiting for room.
    pub async fn send_message(&self, message: Message) -> Result<(), BrokerError> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::ShuttingDown);
        }

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(BrokerError::ShuttingDown),
            sent = self.queue.send(message) => {
                sent.map_err(|_| BrokerError::ShuttingDown)?;
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Submit a message without waiting for room in the queue.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::QueueFull`] if the queue has no room, or
    /// [`BrokerError::ShuttingDown`] after shutdown.
    pub fn try_send_message(&self, message: Message) -> Result<(), BrokerError> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::ShuttingDown);
        }

        self.queue.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BrokerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => BrokerError::ShuttingDown,
        })?;
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Register a user's delivery channel, replacing any previous one.
    ///
    /// The replaced sender is dropped. Its channel closes only once every
    /// other clone of that sender is gone too.
    pub fn register_user(&self, user_id: impl Into<String>, channel: SubscriberChannel) {
        self.registry.register(user_id, channel);
    }

    /// Unregister a user and drop the broker's sender for it.
    ///
    /// The receiver sees the channel close only if the caller kept no clone
    /// of the sender passed to [`Broker::register_user`].
    pub fn unregister_user(&self, user_id: &str) {
        if !self.registry.unregister(user_id) {
            debug!(user = %user_id, "Unregister for unknown user");
        }
    }

    /// Unregister a user only while `channel` is its current registration.
    ///
    /// Returns `true` if the entry was removed.
    pub fn unregister_channel(&self, user_id: &str, channel: &SubscriberChannel) -> bool {
        self.registry.unregister_channel(user_id, channel)
    }

    /// Check if a user is registered.
    #[must_use]
    pub fn is_registered(&self, user_id: &str) -> bool {
        self.registry.is_registered(user_id)
    }

    /// All registered user IDs.
    #[must_use]
    pub fn user_ids(&self) -> Vec<String> {
        self.registry.user_ids()
    }

    /// Wait until the dispatch loop has stopped.
    ///
    /// Never completes if [`Broker::run`] was not called.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await;
    }

    /// Check if the dispatch loop has stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Check if shutdown was requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Get the broker configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Get broker statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            subscriber_count: self.registry.len(),
        }
    }
}
