//! Ingestion consumer loop.
//!
//! One sequential loop per consumer: fetch a batch, hand it to the
//! [`MessageHandler`], and ack each message only after the handler succeeded
//! for the whole batch. A failed batch is left unacked and nak'd with the
//! backoff as its delay, so the transport redelivers it ahead of newer
//! messages once the loop resumes fetching.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use twider_core::config::StreamConfig;
use twider_core::error::Result;

use crate::handler::MessageHandler;
use crate::transport::{StreamMessage, StreamTransport};

/// Loop timing and batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub batch_size: usize,
    /// Bounded wait for one fetch.
    pub fetch_timeout: Duration,
    /// Pause after a failed cycle.
    pub backoff: Duration,
    /// Pause after an empty fetch.
    pub poll_interval: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
            backoff: Duration::from_millis(config.backoff_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

/// Running counters, shared between the loop and its handles.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    batches: AtomicU64,
    acked: AtomicU64,
    failures: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStatsSnapshot {
    /// Batches committed.
    pub batches: u64,
    /// Messages acked.
    pub acked: u64,
    /// Failed cycles (fetch, handler, dead-letter or ack).
    pub failures: u64,
    /// Messages republished to the dead-letter path.
    pub dead_lettered: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Control handle for a running consumer.
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    stats: Arc<ConsumerStats>,
}

impl ConsumerHandle {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    /// Ask the loop to exit after its current cycle.
    ///
    /// Interrupts a pending poll or backoff pause, never a fetch or a batch
    /// in progress.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }
}

/// What one fetch/handle cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The fetch returned nothing within its timeout.
    Idle,
    /// The batch was handled and every message acked.
    Committed { acked: usize, dead_lettered: usize },
    /// Something failed; unacked messages were nak'd for redelivery.
    Failed,
}

/// Durable pull consumer driving a [`MessageHandler`].
pub struct IngestionConsumer<T, H> {
    transport: T,
    handler: H,
    settings: ConsumerSettings,
    handle: ConsumerHandle,
}

impl<T, H> IngestionConsumer<T, H>
where
    T: StreamTransport,
    H: MessageHandler,
{
    pub fn new(transport: T, handler: H, settings: ConsumerSettings) -> Self {
        Self {
            transport,
            handler,
            settings,
            handle: ConsumerHandle::new(),
        }
    }

    pub fn handle(&self) -> ConsumerHandle {
        self.handle.clone()
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Run one fetch/handle/ack cycle.
    pub async fn poll_once(&self) -> CycleOutcome {
        let stats = &self.handle.stats;

        let messages = match self
            .transport
            .fetch(self.settings.batch_size, self.settings.fetch_timeout)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Fetch failed");
                stats.failures.fetch_add(1, Ordering::Relaxed);
                return CycleOutcome::Failed;
            }
        };

        if messages.is_empty() {
            return CycleOutcome::Idle;
        }
        debug!(count = messages.len(), "Fetched batch");

        let payloads: Vec<&[u8]> = messages.iter().map(|m| m.payload()).collect();
        let report = match self.handler.handle(&payloads).await {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    error = %e,
                    count = messages.len(),
                    backoff_ms = self.settings.backoff.as_millis() as u64,
                    "Batch failed, leaving unacknowledged"
                );
                self.release(&messages).await;
                stats.failures.fetch_add(1, Ordering::Relaxed);
                return CycleOutcome::Failed;
            }
        };

        let mut dead_lettered = 0;
        for rejected in &report.rejected {
            let Some(message) = messages.get(rejected.position) else {
                warn!(position = rejected.position, "Rejected position outside batch");
                continue;
            };
            if let Err(e) = self.transport.dead_letter(message, &rejected.reason).await {
                error!(error = %e, subject = message.subject(), "Dead-letter failed");
                self.release(&messages).await;
                stats.failures.fetch_add(1, Ordering::Relaxed);
                return CycleOutcome::Failed;
            }
            warn!(
                subject = message.subject(),
                reason = %rejected.reason,
                "Message dead-lettered"
            );
            dead_lettered += 1;
        }
        stats
            .dead_lettered
            .fetch_add(dead_lettered as u64, Ordering::Relaxed);

        let mut acked = 0;
        for (position, message) in messages.iter().enumerate() {
            if let Err(e) = self.transport.ack(message).await {
                error!(error = %e, acked, "Ack failed, remainder will be redelivered");
                self.release(&messages[position..]).await;
                stats.acked.fetch_add(acked as u64, Ordering::Relaxed);
                stats.failures.fetch_add(1, Ordering::Relaxed);
                return CycleOutcome::Failed;
            }
            acked += 1;
        }
        stats.acked.fetch_add(acked as u64, Ordering::Relaxed);
        stats.batches.fetch_add(1, Ordering::Relaxed);

        info!(
            acked,
            indexed = report.indexed,
            dead_lettered,
            "Batch committed"
        );
        CycleOutcome::Committed {
            acked,
            dead_lettered,
        }
    }

    /// Nak `messages` so they are redelivered after the backoff.
    ///
    /// A failed nak only delays redelivery until the ack wait expires.
    async fn release(&self, messages: &[T::Message]) {
        for message in messages {
            if let Err(e) = self.transport.nak(message, self.settings.backoff).await {
                warn!(error = %e, subject = message.subject(), "Nak failed");
            }
        }
    }

    /// Sleep for `duration` unless stopped first.
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.handle.shutdown.notified() => {}
        }
    }

    /// Consume until [`ConsumerHandle::stop`] is called, then close the
    /// transport.
    pub async fn run(self) -> Result<ConsumerStatsSnapshot> {
        info!(
            batch_size = self.settings.batch_size,
            fetch_timeout_ms = self.settings.fetch_timeout.as_millis() as u64,
            "Ingestion consumer started"
        );

        while self.handle.is_running() {
            match self.poll_once().await {
                CycleOutcome::Committed { .. } => {}
                CycleOutcome::Idle => self.pause(self.settings.poll_interval).await,
                CycleOutcome::Failed => self.pause(self.settings.backoff).await,
            }
        }

        let closed = self.transport.close().await;
        let stats = self.handle.stats();
        info!(
            batches = stats.batches,
            acked = stats.acked,
            failures = stats.failures,
            dead_lettered = stats.dead_lettered,
            "Ingestion consumer stopped"
        );
        closed.map(|_| stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = StreamConfig {
            batch_size: 0,
            fetch_timeout_ms: 250,
            backoff_ms: 5_000,
            poll_interval_ms: 100,
            ..Default::default()
        };
        let settings = ConsumerSettings::from_config(&config);
        assert_eq!(settings.batch_size, 1);
        assert_eq!(settings.fetch_timeout, Duration::from_millis(250));
        assert_eq!(settings.backoff, Duration::from_secs(5));
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_default_settings_match_stream_defaults() {
        let settings = ConsumerSettings::default();
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.fetch_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_handle_stop() {
        let handle = ConsumerHandle::new();
        assert!(handle.is_running());
        handle.stop();
        assert!(!handle.is_running());
        assert_eq!(handle.stats(), ConsumerStatsSnapshot::default());
    }
}
