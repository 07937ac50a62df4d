//! Shared fixtures for Parley benchmarks.

use parley_core::{subscriber_channel, Broker, BrokerConfig, Message, SubscriberReceiver};
use tokio_util::sync::CancellationToken;

/// A running broker with `users` registered subscribers named `user-0..`.
pub struct Fixture {
    pub broker: Broker,
    pub receivers: Vec<SubscriberReceiver>,
    pub shutdown: CancellationToken,
}

impl Fixture {
    /// Build and start a broker. Must be called inside a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if the broker fails to start.
    #[must_use]
    pub fn start(users: usize, subscriber_capacity: usize) -> Self {
        let shutdown = CancellationToken::new();
        let broker = Broker::with_config(
            shutdown.clone(),
            BrokerConfig {
                queue_capacity: 1024,
                ..BrokerConfig::default()
            },
        );
        broker.run().expect("broker starts once");

        let receivers = (0..users)
            .map(|i| {
                let (tx, rx) = subscriber_channel(subscriber_capacity);
                broker.register_user(format!("user-{i}"), tx);
                rx
            })
            .collect();

        Self {
            broker,
            receivers,
            shutdown,
        }
    }

    /// Send `count` directed messages to `user-0` and wait for all of them.
    pub async fn direct_round(&mut self, count: usize) {
        for i in 0..count {
            let msg = Message::direct("bench", "user-0", i.to_string());
            self.broker.send_message(msg).await.expect("broker running");
            self.receivers[0].recv().await.expect("delivered");
        }
    }

    /// Send one broadcast and wait until every subscriber has it.
    pub async fn broadcast_round(&mut self) {
        self.broker
            .send_message(Message::broadcast_from("bench", "hello everyone"))
            .await
            .expect("broker running");
        for rx in &mut self.receivers {
            rx.recv().await.expect("delivered");
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
