//! The broker's dispatch loop.
//!
//! One [`Dispatcher`] drains the input queue and routes each message either to
//! its recipient or to every subscriber. Running a single loop keeps delivery
//! in dequeue order.

use crate::broker::{BrokerConfig, Counters};
use crate::message::Message;
use crate::registry::{Registry, SubscriberChannel};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Outcome of handing one copy of a message to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    Dropped,
    Cancelled,
}

/// Why a send to a subscriber failed.
#[derive(Debug, Clone, Copy)]
enum DeliveryFailure {
    Closed,
    TimedOut,
}

/// State owned by the dispatch task.
pub(crate) struct Dispatcher {
    pub(crate) queue: mpsc::Receiver<Message>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) stopped: CancellationToken,
    pub(crate) counters: Arc<Counters>,
    pub(crate) config: BrokerConfig,
}

impl Dispatcher {
    /// Run until the shutdown token fires or every queue sender is gone.
    ///
    /// Messages still queued at that point are dropped.
    pub(crate) async fn run(mut self) {
        // Fires the completion signal on every exit path, including panics.
        let _stopped = self.stopped.clone().drop_guard();

        info!("Dispatch loop started");

        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => {
                    debug!("Shutdown observed by dispatch loop");
                    break;
                }

                msg = self.queue.recv() => match msg {
                    Some(msg) => {
                        if self.dispatch(msg).await == Delivery::Cancelled {
                            break;
                        }
                    }
                    None => {
                        debug!("Input queue closed");
                        break;
                    }
                },
            }
        }

        self.queue.close();
        info!("Dispatch loop stopped");
    }

    async fn dispatch(&self, message: Message) -> Delivery {
        let message = Arc::new(message);
        if message.broadcast {
            self.broadcast_message(message).await
        } else {
            self.send_to_user(message).await
        }
    }

    async fn send_to_user(&self, message: Arc<Message>) -> Delivery {
        let Some(channel) = self.registry.get(&message.recipient) else {
            debug!(
                sender = %message.sender,
                recipient = %message.recipient,
                "Recipient not registered, dropping message"
            );
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Delivery::Dropped;
        };

        let recipient = message.recipient.clone();
        self.deliver(&recipient, &channel, message).await
    }

    async fn broadcast_message(&self, message: Arc<Message>) -> Delivery {
        let subscribers = self.registry.snapshot();
        let mut recipients = 0usize;

        for (user_id, channel) in subscribers {
            if self.config.exclude_sender_from_broadcast && user_id == message.sender {
                continue;
            }
            match self.deliver(&user_id, &channel, Arc::clone(&message)).await {
                Delivery::Delivered => recipients += 1,
                Delivery::Dropped => {}
                Delivery::Cancelled => return Delivery::Cancelled,
            }
        }

        trace!(sender = %message.sender, recipients, "Broadcast dispatched");
        Delivery::Delivered
    }

    /// Hand one copy to a subscriber, waiting for room in its channel.
    async fn deliver(
        &self,
        user_id: &str,
        channel: &SubscriberChannel,
        message: Arc<Message>,
    ) -> Delivery {
        let outcome = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Delivery::Cancelled,
            outcome = send_with_timeout(channel, message, self.config.delivery_timeout) => outcome,
        };

        match outcome {
            Ok(()) => {
                trace!(user = %user_id, "Delivered message");
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                Delivery::Delivered
            }
            Err(DeliveryFailure::Closed) => {
                debug!(user = %user_id, "Subscriber channel closed, dropping message");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::Dropped
            }
            Err(DeliveryFailure::TimedOut) => {
                warn!(user = %user_id, "Subscriber too slow, dropping message");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::Dropped
            }
        }
    }
}

async fn send_with_timeout(
    channel: &SubscriberChannel,
    message: Arc<Message>,
    timeout: Option<Duration>,
) -> Result<(), DeliveryFailure> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, channel.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryFailure::Closed),
            Err(_) => Err(DeliveryFailure::TimedOut),
        },
        None => channel
            .send(message)
            .await
            .map_err(|_| DeliveryFailure::Closed),
    }
}
