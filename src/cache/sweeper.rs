use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::{
    cache::UrlCache,
    lifecycle::ShutdownHandle,
    telemetry::{LogChannel, LogMessage},
};

/// Background loop that physically removes expired cache entries
pub struct CacheSweeper {
    cache: Arc<UrlCache>,
    interval: Duration,
    log: LogChannel,
    shutdown: ShutdownHandle,
}

impl CacheSweeper {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

    pub fn new(cache: Arc<UrlCache>, log: LogChannel) -> Self {
        Self {
            cache,
            interval: Self::DEFAULT_INTERVAL,
            log,
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Get a handle for graceful shutdown
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Sweep every `interval` until shutdown. No sweep starts after stop.
    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.sweep_once().await,
            }
        }

        self.log.log(LogMessage::info("Cache sweeper stopped")).await;
    }

    async fn sweep_once(&self) {
        let removed = self.cache.sweep();
        let remaining = self.cache.len();

        let message = if removed > 0 {
            LogMessage::info("Removed expired cache entries")
        } else {
            LogMessage::debug("Cache sweep found nothing to remove")
        };
        self.log
            .log(
                message
                    .with_field("removed", removed)
                    .with_field("remaining", remaining),
            )
            .await;
    }
}
