//! Docker Metadata: a live registry of the containers running on a host.
//!
//! The registry is loaded from the Docker daemon at startup and kept current
//! from its event stream. Downstream log processing uses it to attach
//! container metadata (name, image, labels, environment) to log records, even
//! for a short while after a container has exited.
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub mod api;
pub mod container;
pub mod docker;
pub mod enrich;
pub mod error;
pub mod runtime;
pub mod store;
pub mod watcher;

pub use container::Container;
pub use runtime::Runtime;
pub use watcher::{Watcher, WatcherConfig};

/// Address the inspection API binds to when `WATCHER_API_ADDR` is unset.
pub const DEFAULT_API_ADDR: &str = "127.0.0.1:3000";

/// Runs the container registry until Ctrl-C.
///
/// Reads the configuration from the environment, starts the watcher against the
/// Docker daemon and serves the registry over HTTP.
///
/// # Errors
///
/// Possible errors include:
/// - Invalid configuration values in the environment.
/// - Unreadable TLS material.
/// - Failure to list the running containers at startup.
/// - Failure to bind the API listener.
pub async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = WatcherConfig::from_env()?;
    log::debug!("Configuration: {config:?}");

    let mut watcher = Watcher::from_config(&config)?;
    watcher.start().await?;
    let watcher = Arc::new(watcher);

    let shutdown = CancellationToken::new();
    let mut api = {
        let addr =
            std::env::var("WATCHER_API_ADDR").unwrap_or_else(|_| DEFAULT_API_ADDR.to_owned());
        let server = api::APIServer::new(Arc::clone(&watcher));
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.listen(addr, shutdown).await })
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal?,
        result = &mut api => {
            watcher.stop().await;
            result??;
            return Ok(());
        }
    }

    log::info!("Shutting down");
    shutdown.cancel();
    watcher.stop().await;
    api.await??;
    Ok(())
}
