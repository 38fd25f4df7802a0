use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::router::SignalRouter;

/// Periodically evict peers that have been silent for longer than
/// `idle_timeout`. A silent peer is gone by `idle_timeout + sweep_interval`.
pub fn spawn_idle_reaper(
    router: SignalRouter,
    sweep_interval: Duration,
    idle_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = router.evict_idle(Instant::now(), idle_timeout).await;
            if evicted > 0 {
                tracing::info!(evicted, "Idle sweep closed stale peers");
            }
        }
    })
}
