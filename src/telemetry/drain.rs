use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    lifecycle::ShutdownHandle,
    telemetry::{ChannelStats, LogMessage},
};

/// Single consumer of the log channel.
///
/// Messages are buffered in memory and handed to the structured logger once the
/// buffer reaches its capacity. On shutdown the channel is closed, whatever is
/// still queued is pulled in, and the buffer is flushed.
pub struct LogDrain {
    receiver: mpsc::Receiver<LogMessage>,
    buffer: Vec<LogMessage>,
    flush_threshold: usize,
    stats: Arc<ChannelStats>,
    shutdown: ShutdownHandle,
}

impl LogDrain {
    pub(crate) fn new(
        receiver: mpsc::Receiver<LogMessage>,
        flush_threshold: usize,
        stats: Arc<ChannelStats>,
    ) -> Self {
        Self {
            receiver,
            buffer: Vec::new(),
            flush_threshold: flush_threshold.max(1),
            stats,
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Override the flush threshold (defaults to the channel capacity)
    pub fn with_flush_threshold(mut self, flush_threshold: usize) -> Self {
        self.flush_threshold = flush_threshold.max(1);
        self
    }

    /// Get a handle for graceful shutdown
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Consume messages until shutdown or until every producer is gone.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                received = self.receiver.recv() => match received {
                    Some(message) => {
                        self.buffer.push(message);
                        if self.buffer.len() >= self.flush_threshold {
                            self.flush();
                        }
                    }
                    None => break,
                },
            }
        }

        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            self.buffer.push(message);
        }
        let remaining = self.buffer.len();
        self.flush();

        tracing::info!(
            flushed_on_shutdown = %remaining,
            delivered_total = %self.stats.delivered(),
            dropped_total = %self.stats.dropped(),
            "Log drain stopped"
        );
    }

    fn flush(&mut self) {
        let count = self.buffer.len();
        if count == 0 {
            return;
        }
        for message in self.buffer.drain(..) {
            message.dispatch();
        }
        self.stats.record_delivered(count);
    }

    #[cfg(test)]
    pub(crate) fn try_take(&mut self) -> Option<LogMessage> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::telemetry::{LogChannel, LogMessage};

    #[tokio::test]
    async fn buffer_flushes_at_threshold() {
        let (channel, drain) = LogChannel::new(16);
        let drain = drain.with_flush_threshold(3);
        let shutdown = drain.shutdown_handle();
        let task = tokio::spawn(drain.run());

        for i in 0..3_u64 {
            channel
                .enqueue(LogMessage::info("tick").with_field("i", i))
                .await
                .unwrap();
        }

        // Wait for the drain to pick the batch up.
        let mut waited = 0;
        while channel.stats().delivered() < 3 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert_eq!(channel.stats().delivered(), 3);

        shutdown.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn below_threshold_stays_buffered_until_shutdown() {
        let (channel, drain) = LogChannel::new(100);
        let shutdown = drain.shutdown_handle();
        let task = tokio::spawn(drain.run());

        channel.enqueue(LogMessage::info("one")).await.unwrap();
        channel.enqueue(LogMessage::warn("two")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(channel.stats().delivered(), 0);

        shutdown.shutdown();
        task.await.unwrap();
        assert_eq!(channel.stats().delivered(), 2);
    }

    #[tokio::test]
    async fn drain_exits_when_all_producers_dropped() {
        let (channel, drain) = LogChannel::new(8);
        channel.enqueue(LogMessage::debug("last")).await.unwrap();
        drop(channel);

        let task = tokio::spawn(drain.run());
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("drain should stop once producers are gone")
            .unwrap();
    }
}
