//! Example background worker.
//!
//! Stands in for real background jobs: it ticks on a fixed interval until the
//! service's termination token is cancelled.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default delay between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ExampleWorker {
    interval: Duration,
}

impl Default for ExampleWorker {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

impl ExampleWorker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Tick until `shutdown` is cancelled. Returns the number of ticks.
    pub async fn run(self, shutdown: CancellationToken) -> u64 {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "worker started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    ticks += 1;
                    tracing::debug!(tick = ticks, "example worker tick");
                }
            }
        }

        tracing::info!(ticks, "worker stopped");
        ticks
    }
}
