//! Eisen document store server.
//!
//! An axum WebSocket server holding per-actor task and history documents
//! and pushing task snapshots to subscribers.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin eisen-store
//!
//! # Run on custom address
//! cargo run --bin eisen-store -- --bind 127.0.0.1:8100
//! ```

use std::sync::Arc;

use clap::Parser;
use eisen_store::config::{StoreCliArgs, StoreConfig};
use eisen_store::server::{self, StoreState};

#[tokio::main]
async fn main() {
    let cli = StoreCliArgs::parse();

    let config = match StoreConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting eisen store server");

    let state = Arc::new(StoreState::with_config(
        config.max_frame_size,
        config.max_subscriptions,
    ));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "store server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "store server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start store server");
            std::process::exit(1);
        }
    }
}
