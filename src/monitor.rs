use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::{
    admission::ActiveWorkers,
    lifecycle::ShutdownHandle,
    telemetry::{LogChannel, LogMessage},
};

/// Worker pool ceiling tracked by the monitor. Only ever grows.
#[derive(Debug, Clone)]
pub struct PoolCeiling(Arc<AtomicI64>);

impl PoolCeiling {
    pub fn new(initial: i64) -> Self {
        Self(Arc::new(AtomicI64::new(initial)))
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Raise the ceiling to `value` if it is higher. Returns the previous ceiling.
    fn raise_to(&self, value: i64) -> i64 {
        self.0.fetch_max(value, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPressure {
    /// More active workers than the ceiling; the ceiling was raised
    OverCapacity { previous_ceiling: i64 },
    UnderCapacity,
    Nominal,
}

/// Periodically compares active workers with the pool ceiling and reports
/// pressure. Observes only; it never resizes the admission gates.
pub struct PoolMonitor {
    active: ActiveWorkers,
    ceiling: PoolCeiling,
    interval: Duration,
    log: LogChannel,
    shutdown: ShutdownHandle,
}

impl PoolMonitor {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
    pub const DEFAULT_CEILING: i64 = 2000;

    pub fn new(active: ActiveWorkers, log: LogChannel) -> Self {
        Self {
            active,
            ceiling: PoolCeiling::new(Self::DEFAULT_CEILING),
            interval: Self::DEFAULT_INTERVAL,
            log,
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_ceiling(mut self, ceiling: i64) -> Self {
        self.ceiling = PoolCeiling::new(ceiling);
        self
    }

    pub fn ceiling(&self) -> PoolCeiling {
        self.ceiling.clone()
    }

    /// Get a handle for graceful shutdown
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Take one observation and report it.
    pub async fn check(&self) -> PoolPressure {
        let current = self.active.current();
        let ceiling = self.ceiling.get();

        if current > ceiling {
            let previous_ceiling = self.ceiling.raise_to(current);
            self.log
                .log(
                    LogMessage::warn("Worker pool over capacity, raising ceiling")
                        .with_field("current", current)
                        .with_field("previous_ceiling", previous_ceiling),
                )
                .await;
            PoolPressure::OverCapacity { previous_ceiling }
        } else if current < ceiling {
            self.log
                .log(
                    LogMessage::debug("Worker pool below ceiling")
                        .with_field("current", current)
                        .with_field("ceiling", ceiling),
                )
                .await;
            PoolPressure::UnderCapacity
        } else {
            self.log
                .log(
                    LogMessage::info("Worker pool at ceiling")
                        .with_field("current", current)
                        .with_field("ceiling", ceiling),
                )
                .await;
            PoolPressure::Nominal
        }
    }

    /// Observe every `interval` until shutdown
    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.check().await;
                }
            }
        }

        self.log
            .log(LogMessage::info("Worker pool monitoring stopped"))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionController, CallContext};

    fn monitor(admission: &AdmissionController, ceiling: i64) -> PoolMonitor {
        let (log, _drain) = LogChannel::new(64);
        PoolMonitor::new(admission.active_workers(), log).with_ceiling(ceiling)
    }

    #[tokio::test]
    async fn idle_pool_is_under_capacity() {
        let admission = AdmissionController::new(10, 10);
        let monitor = monitor(&admission, 2);

        assert_eq!(monitor.check().await, PoolPressure::UnderCapacity);
        assert_eq!(monitor.ceiling().get(), 2);
    }

    #[tokio::test]
    async fn load_at_ceiling_is_nominal() {
        let admission = AdmissionController::new(10, 10);
        let monitor = monitor(&admission, 2);
        let _a = admission.acquire(&CallContext::new()).await.unwrap();
        let _b = admission.acquire(&CallContext::new()).await.unwrap();

        assert_eq!(monitor.check().await, PoolPressure::Nominal);
    }

    #[tokio::test]
    async fn overload_ratchets_ceiling_up_and_never_down() {
        let admission = AdmissionController::new(10, 10);
        let monitor = monitor(&admission, 1);

        let permits: Vec<_> = {
            let mut permits = Vec::new();
            for _ in 0..3 {
                permits.push(admission.acquire(&CallContext::new()).await.unwrap());
            }
            permits
        };

        assert_eq!(
            monitor.check().await,
            PoolPressure::OverCapacity {
                previous_ceiling: 1
            }
        );
        assert_eq!(monitor.ceiling().get(), 3);

        drop(permits);
        assert_eq!(monitor.check().await, PoolPressure::UnderCapacity);
        assert_eq!(monitor.ceiling().get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_once_on_repeated_shutdown() {
        let admission = AdmissionController::new(10, 10);
        let monitor = monitor(&admission, 5).with_interval(Duration::from_secs(2));
        let shutdown = monitor.shutdown_handle();

        let task = tokio::spawn(monitor.run());
        tokio::time::sleep(Duration::from_secs(7)).await;

        assert!(shutdown.shutdown());
        assert!(!shutdown.shutdown());
        task.await.unwrap();
    }
}
