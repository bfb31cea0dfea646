#![warn(clippy::nursery, clippy::pedantic)]

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::net::TcpListener;
use tokio::task;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::Config;
use crate::store::PasteStore;
use crate::time::now_ms;

mod api;
mod backend;
mod config;
mod paste;
mod short_code;
mod store;
mod time;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    if config.test_mode {
        warn!("Test mode is on; clients can set the clock with x-test-now-ms");
    }

    let backend = backend::open(&config.database_url, config.pool_size)
        .await
        .context("Failed to open paste backend")?;
    let store = PasteStore::new(backend);

    let stop_signal = Arc::new(AtomicBool::new(false));
    if let Some(interval) = config.sweep_interval() {
        task::spawn(cleanup(Arc::clone(&stop_signal), store.clone(), interval));
    }

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;
    info!(addr = %config.bind, "Listening");

    let app = api::router(AppState {
        store,
        test_mode: config.test_mode,
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    stop_signal.store(true, Ordering::Release);
    Ok(())
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            error!("Failed to register signal handlers: {}", e);
            return std::future::pending().await;
        }
    };

    if let Some(signal) = signals.next().await {
        info!(signal, "Shutting down");
    }
    signals.handle().close();
}

/// Periodic clean-up task that deletes dead pastes.
async fn cleanup(stop_signal: Arc<AtomicBool>, store: PasteStore, interval: Duration) {
    while !stop_signal.load(Ordering::Acquire) {
        tokio::time::sleep(interval).await;
        match store.sweep(now_ms()).await {
            Ok(0) => (),
            Ok(deleted) => info!(deleted, "Swept dead pastes"),
            Err(e) => warn!("Failed to sweep dead pastes: {}", e),
        }
    }
}
