//! Live registry of the containers running on a host.
//!
//! A [`Watcher`] loads the running containers once on [`Watcher::start`], then
//! keeps the registry current from the runtime's event stream. Dead containers
//! remain resolvable for a grace period, so log lines they produced shortly
//! before exiting can still be enriched.
//!
//! # Key Components
//!
//! - [`Watcher`]: facade owning the store and the background tasks.
//! - [`WatcherConfig`]: endpoint, TLS, grace period, sweep interval and backoff.
//! - [`BackoffConfig`]: bounds of the jittered exponential reconnect delay.
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::container::Container;
use crate::docker::DockerClient;
use crate::runtime::Runtime;
use crate::store::{Snapshot, Store};

mod backoff;
mod config;
mod consumer;
mod error;
mod sweeper;
mod sync;
#[cfg(test)]
mod testing;

pub use backoff::BackoffConfig;
pub use config::WatcherConfig;
pub use error::{Error, Result};

use backoff::Backoff;
use consumer::EventConsumer;

/// Keeps an in-memory registry of containers in sync with a [`Runtime`].
pub struct Watcher<R: Runtime> {
    runtime: Arc<R>,
    store: Arc<Store>,
    grace_period: Duration,
    sweep_interval: Duration,
    backoff: BackoffConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: bool,
}

impl Watcher<DockerClient> {
    /// Creates a watcher for the Docker daemon described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if the host is invalid, the TLS material cannot be loaded or the
    /// timing settings are invalid.
    pub fn from_config(config: &WatcherConfig) -> Result<Self> {
        let client = DockerClient::new(&config.host, config.tls.as_ref())?;
        Self::new(client, config)
    }
}

impl<R: Runtime> Watcher<R> {
    /// Creates a watcher on top of an existing runtime client. Nothing is
    /// loaded until [`Watcher::start`].
    pub fn new(runtime: R, config: &WatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            runtime: Arc::new(runtime),
            store: Arc::new(Store::new()),
            grace_period: config.grace_period,
            sweep_interval: config.sweep_interval,
            backoff: config.backoff,
            cancel: CancellationToken::new(),
            tasks: Mutex::default(),
            started: false,
        })
    }

    /// Loads the running containers and starts the event consumer and the
    /// sweeper in the background.
    ///
    /// Returns once the initial listing is in the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InitialList`] if the runtime cannot list containers and
    /// [`Error::AlreadyStarted`] on a second call.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let cursor = sync::initial_sync(self.runtime.as_ref(), &self.store).await?;
        self.started = true;

        let consumer = EventConsumer::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.store),
            cursor,
            Backoff::new(self.backoff),
            self.cancel.clone(),
        );
        let sweeper = sweeper::run_sweeper(
            Arc::clone(&self.store),
            self.sweep_interval,
            self.grace_period,
            self.cancel.clone(),
        );
        self.tasks
            .get_mut()
            .extend([tokio::spawn(consumer.run()), tokio::spawn(sweeper)]);
        log::debug!(
            "Started container watcher with {} containers",
            self.store.len()
        );

        Ok(())
    }

    /// Returns the container known under `key`, an ID or a name.
    pub fn container(&self, key: &str) -> Option<Arc<Container>> {
        self.store.get(key)
    }

    /// Returns a snapshot of all known containers keyed by ID and by name.
    pub fn containers(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Stops the background tasks and waits for them to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for handle in tasks {
            if let Err(err) = handle.await {
                log::error!("watcher task failed: {err}");
            }
        }
        log::debug!("Watcher stopped");
    }
}

impl<R: Runtime> Drop for Watcher<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
