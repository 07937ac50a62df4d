//! # parley-core
//!
//! In-process chat broker and its collaborators for the Parley chat server.
//!
//! This crate provides:
//!
//! - **Broker** - Bounded ingress queue, single dispatch loop and shutdown handling
//! - **Registry** - User ID to delivery channel mapping
//! - **Message** - Chat message type and field validation
//! - **Store** - Append-only message log
//! - **User** - User records and directory
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Producers  │────▶│   Broker    │────▶│ Subscribers │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Registry   │
//!                     └─────────────┘
//! ```

pub mod broker;
mod dispatch;
pub mod message;
pub mod registry;
pub mod store;
pub mod user;

pub use broker::{Broker, BrokerConfig, BrokerError, BrokerStats, DEFAULT_QUEUE_CAPACITY};
pub use message::{validate, Message, ValidationError};
pub use registry::{subscriber_channel, SubscriberChannel, SubscriberReceiver};
pub use store::{MessageStore, StorageError};
pub use user::{User, UserDirectory, UserError};
