//! # Parley Server
//!
//! Chat server routing messages between users through the Parley broker.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parley
//!
//! # Run with environment overrides
//! PARLEY_PORT=8080 PARLEY_HOST=0.0.0.0 parley
//! ```
//!
//! A `parley.toml` in the working directory, `/etc/parley/` or
//! `~/.config/parley/` is picked up automatically.

mod api;
mod config;
mod error;
mod handlers;
mod metrics;
mod models;
mod shutdown;
mod storage;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parley_server=debug,parley_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Parley server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown::cancel_on_signal(shutdown.clone()));

    handlers::run_server(config, shutdown).await?;

    Ok(())
}
