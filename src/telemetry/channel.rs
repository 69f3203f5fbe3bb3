use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::sleep,
};

use crate::telemetry::{LogChannelError, LogDrain, LogMessage};

/// Counters shared between producers and the drain task
#[derive(Debug, Default)]
pub struct ChannelStats {
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl ChannelStats {
    /// Messages dropped because the queue stayed full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Messages handed to the structured logger by the drain task
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, count: usize) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Producer side of the bounded log queue.
///
/// Producers never block on log I/O: a full queue gets one retry after
/// `retry_delay`, after which the message is dropped with a synchronous
/// warning. Cloning is cheap; every clone feeds the same drain.
#[derive(Clone)]
pub struct LogChannel {
    sender: mpsc::Sender<LogMessage>,
    retry_delay: Duration,
    stats: Arc<ChannelStats>,
}

impl LogChannel {
    pub const DEFAULT_CAPACITY: usize = 100_000;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

    /// Create the channel and its single drain.
    ///
    /// The drain flushes its buffer once it holds `capacity` messages.
    pub fn new(capacity: usize) -> (Self, LogDrain) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let stats = Arc::new(ChannelStats::default());

        let channel = Self {
            sender,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
            stats: stats.clone(),
        };
        let drain = LogDrain::new(receiver, capacity, stats);

        (channel, drain)
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Queue a message for the drain task.
    pub async fn enqueue(&self, mut message: LogMessage) -> Result<(), LogChannelError> {
        message.truncate_fields();

        let message = match self.sender.try_send(message) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(message)) => message,
            Err(TrySendError::Closed(message)) => return Self::write_through(message),
        };

        sleep(self.retry_delay).await;

        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => {
                self.stats.record_dropped();
                tracing::warn!(
                    msg = %message.text,
                    dropped_total = %self.stats.dropped(),
                    "Failed to queue log message, channel full"
                );
                Err(LogChannelError::Saturated)
            }
            Err(TrySendError::Closed(message)) => Self::write_through(message),
        }
    }

    /// Fire-and-forget variant of [`enqueue`](Self::enqueue).
    ///
    /// Failures were already reported by `enqueue`, telemetry loss is never fatal.
    pub async fn log(&self, message: LogMessage) {
        let _ = self.enqueue(message).await;
    }

    fn write_through(message: LogMessage) -> Result<(), LogChannelError> {
        message.dispatch();
        Err(LogChannelError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::FieldValue;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn enqueue_succeeds_with_room() {
        let (channel, _drain) = LogChannel::new(4);
        channel
            .enqueue(LogMessage::info("hello").with_field("k", "v"))
            .await
            .unwrap();
        assert_eq!(channel.stats().dropped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_drops_after_single_retry() {
        let (channel, _drain) = LogChannel::new(1);
        channel.enqueue(LogMessage::info("first")).await.unwrap();

        let started = Instant::now();
        let result = channel.enqueue(LogMessage::info("second")).await;
        let waited = started.elapsed();

        assert_eq!(result, Err(LogChannelError::Saturated));
        assert_eq!(channel.stats().dropped(), 1);
        assert!(waited >= LogChannel::DEFAULT_RETRY_DELAY);
        assert!(waited < LogChannel::DEFAULT_RETRY_DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_when_drain_makes_room() {
        let (channel, mut drain) = LogChannel::new(1);
        channel.enqueue(LogMessage::info("first")).await.unwrap();

        let producer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.enqueue(LogMessage::info("second")).await })
        };

        // Free the slot while the producer is sleeping before its retry.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let first = drain.try_take().expect("queued message");
        assert_eq!(first.text, "first");

        assert_eq!(producer.await.unwrap(), Ok(()));
        assert_eq!(channel.stats().dropped(), 0);
    }

    #[tokio::test]
    async fn closed_channel_reports_closed() {
        let (channel, drain) = LogChannel::new(4);
        drop(drain);

        let result = channel.enqueue(LogMessage::error("late")).await;
        assert_eq!(result, Err(LogChannelError::Closed));
    }

    #[tokio::test]
    async fn enqueue_truncates_before_queueing() {
        let (channel, mut drain) = LogChannel::new(4);
        channel
            .enqueue(LogMessage::info("t").with_field("url", "a".repeat(300)))
            .await
            .unwrap();

        let queued = drain.try_take().expect("queued message");
        assert_eq!(queued.fields[0].1, FieldValue::Str("a".repeat(100)));
    }
}
