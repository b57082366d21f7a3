//! getlink-relay binary entry point.
//!
//! Usage:
//! ```bash
//! getlink-relay --config relay.toml
//! ```

use anyhow::Context;
use link_relay::bus::{MemoryBus, MessageBus};
use link_relay::cleanup::spawn_cleanup_task;
use link_relay::config::Config;
use link_relay::http::{build_router, health::init_start_time};
use link_relay::registry::ConnectionRegistry;
use link_relay::relay::LinkRelay;
use link_relay::store::SqliteLinkStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = get_config_path();
    let config = load_config(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("getlink-relay v{}", env!("CARGO_PKG_VERSION"));
    init_start_time();

    let store = SqliteLinkStore::new(&config.storage.database)
        .await
        .with_context(|| format!("opening {}", config.storage.database.display()))?;
    tracing::info!("Link store at {}", config.storage.database.display());

    let bus = Arc::new(MemoryBus::new());
    let relay = Arc::new(LinkRelay::new(
        config.clone(),
        Arc::new(store),
        bus.clone(),
        Arc::new(ConnectionRegistry::new()),
    ));

    let cleanup = spawn_cleanup_task(relay.clone(), config.cleanup.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;
    tracing::info!("Listening on {}", config.server.bind_address);

    axum::serve(listener, build_router(relay))
        .with_graceful_shutdown(shutdown_signal(bus))
        .await
        .context("server error")?;

    cleanup.abort();
    tracing::info!("Relay stopped");
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}

/// Read the config file, or fall back to defaults when it does not exist.
fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        Ok(Config::from_file(path)?)
    } else {
        eprintln!("{} not found, using defaults", path.display());
        Ok(Config::default())
    }
}

/// Wait for Ctrl-C, then close the bus so every write loop winds down.
async fn shutdown_signal(bus: Arc<MemoryBus>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown requested");
    bus.shutdown();
}
