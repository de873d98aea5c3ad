use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::store::Store;

/// Periodically removes containers whose tombstone outlived `grace`.
pub(crate) async fn run_sweeper(
    store: Arc<Store>,
    interval: Duration,
    grace: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            now = ticker.tick() => {
                let removed = store.sweep_expired(now, grace);
                if removed > 0 {
                    log::debug!("Swept {removed} expired container keys");
                } else {
                    log::trace!("Sweep found nothing to remove");
                }
            }
        }
    }
    log::debug!("Sweeper stopped");
}
