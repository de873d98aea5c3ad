use std::time::Duration;

/// Bounds of the reconnect delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub initial: Duration,
    /// Upper bound the delay doubles towards.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff with equal jitter.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(config: BackoffConfig) -> Self {
        let config = BackoffConfig {
            initial: config.initial.min(config.max),
            max: config.max,
        };
        Self {
            config,
            current: config.initial,
        }
    }

    /// Returns the next delay, somewhere in `[base / 2, base]`, and doubles
    /// `base` up to the configured maximum.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = self.current.saturating_mul(2).min(self.config.max);
        jitter(base)
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.config.initial;
    }
}

fn jitter(base: Duration) -> Duration {
    let half = base / 2;
    let spread = u64::try_from((base - half).as_millis()).unwrap_or(u64::MAX);
    if spread == 0 {
        return base;
    }
    half + Duration::from_millis(rand::random::<u64>() % (spread + 1))
}
