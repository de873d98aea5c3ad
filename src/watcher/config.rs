use std::path::PathBuf;
use std::time::Duration;

use super::backoff::BackoffConfig;
use super::{Error, Result};
use crate::docker::{self, TlsConfig};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(20);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3);

/// Settings for a [`super::Watcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Docker endpoint, e.g. `unix:///var/run/docker.sock` or `tcp://host:2376`.
    pub host: String,
    pub tls: Option<TlsConfig>,
    /// How long a dead container stays resolvable.
    pub grace_period: Duration,
    /// How often dead containers are swept.
    pub sweep_interval: Duration,
    pub backoff: BackoffConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            host: docker::DEFAULT_HOST.to_owned(),
            tls: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            backoff: BackoffConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Recognized variables:
    ///
    /// - `DOCKER_HOST`
    /// - `DOCKER_TLS_VERIFY`, `DOCKER_CERT_PATH` (defaults to `$HOME/.docker`)
    /// - `WATCHER_GRACE_PERIOD_SECS`, `WATCHER_SWEEP_INTERVAL_SECS`
    /// - `WATCHER_BACKOFF_INITIAL_MS`, `WATCHER_BACKOFF_MAX_MS`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEnv`] if a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("DOCKER_HOST").filter(|host| !host.is_empty()) {
            config.host = host;
        }

        if lookup("DOCKER_TLS_VERIFY").is_some_and(|verify| !verify.is_empty()) {
            let cert_path = lookup("DOCKER_CERT_PATH")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    PathBuf::from(lookup("HOME").unwrap_or_default()).join(".docker")
                });
            config.tls = Some(TlsConfig::from_cert_dir(cert_path));
        }

        let duration = |name: &'static str, unit: fn(u64) -> Duration| -> Result<Option<Duration>> {
            lookup(name)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .map(unit)
                        .map_err(|_| Error::InvalidEnv { name, value })
                })
                .transpose()
        };

        if let Some(grace) = duration("WATCHER_GRACE_PERIOD_SECS", Duration::from_secs)? {
            config.grace_period = grace;
        }
        if let Some(interval) = duration("WATCHER_SWEEP_INTERVAL_SECS", Duration::from_secs)? {
            config.sweep_interval = interval;
        }
        if let Some(initial) = duration("WATCHER_BACKOFF_INITIAL_MS", Duration::from_millis)? {
            config.backoff.initial = initial;
        }
        if let Some(max) = duration("WATCHER_BACKOFF_MAX_MS", Duration::from_millis)? {
            config.backoff.max = max;
        }

        Ok(config)
    }

    /// Checks the invariants the background tasks rely on.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(Error::ZeroDuration("sweep_interval"));
        }
        if self.backoff.max.is_zero() {
            return Err(Error::ZeroDuration("backoff.max"));
        }
        Ok(())
    }
}
