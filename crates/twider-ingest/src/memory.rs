//! In-process durable stream.
//!
//! Test double for the JetStream transport. It keeps the delivery semantics
//! the consumer relies on:
//! - messages stay pending until acked
//! - a delivered message is in flight, not redelivered until it is nak'd or
//!   its ack wait runs out
//! - fetch returns ready messages in publish order and waits up to its
//!   timeout for one to become ready

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use twider_core::error::{Result, TwiderError};

use crate::transport::{StreamMessage, StreamTransport};

/// A delivery of a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMessage {
    pub sequence: u64,
    pub subject: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on each redelivery.
    pub delivery: u32,
}

impl StreamMessage for MemoryMessage {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// A message routed to the dead-letter path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub sequence: u64,
    pub subject: String,
    pub payload: Vec<u8>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Redelivery delay for unacked messages, as in JetStream's default.
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct StoredMessage {
    sequence: u64,
    subject: String,
    payload: Vec<u8>,
    deliveries: u32,
    acked: bool,
    /// Earliest redelivery time while in flight or nak'd with a delay.
    ready_at: Option<Instant>,
}

impl StoredMessage {
    fn is_ready(&self, now: Instant) -> bool {
        !self.acked && self.ready_at.map_or(true, |at| at <= now)
    }
}

#[derive(Debug)]
struct State {
    messages: Vec<StoredMessage>,
    dead_letters: Vec<DeadLetter>,
    next_sequence: u64,
    ack_wait: Duration,
    acks: u64,
    naks: u64,
    fetch_failures: u32,
    ack_failures: u32,
    closed: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            dead_letters: Vec::new(),
            next_sequence: 0,
            ack_wait: DEFAULT_ACK_WAIT,
            acks: 0,
            naks: 0,
            fetch_failures: 0,
            ack_failures: 0,
            closed: false,
        }
    }
}

/// In-memory [`StreamTransport`].
///
/// Cheap to clone; clones share the same stream, so a test can keep one
/// handle for publishing and inspection while the consumer owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    state: Arc<Mutex<State>>,
    published: Arc<Notify>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long a delivered, unacked message stays in flight.
    pub fn with_ack_wait(self, ack_wait: Duration) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.ack_wait = ack_wait;
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| TwiderError::Stream(format!("Lock poisoned: {}", e)))
    }

    /// Append a message. Returns its sequence number.
    pub fn publish(&self, subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Result<u64> {
        let sequence = {
            let mut state = self.lock()?;
            state.next_sequence += 1;
            let sequence = state.next_sequence;
            state.messages.push(StoredMessage {
                sequence,
                subject: subject.into(),
                payload: payload.into(),
                deliveries: 0,
                acked: false,
                ready_at: None,
            });
            sequence
        };
        self.published.notify_waiters();
        Ok(sequence)
    }

    /// Make the next `n` fetches fail.
    pub fn fail_next_fetches(&self, n: u32) -> Result<()> {
        self.lock()?.fetch_failures = n;
        Ok(())
    }

    /// Make the next `n` acks fail.
    pub fn fail_next_acks(&self, n: u32) -> Result<()> {
        self.lock()?.ack_failures = n;
        Ok(())
    }

    /// Messages not yet acked.
    pub fn pending(&self) -> usize {
        self.lock()
            .map(|s| s.messages.iter().filter(|m| !m.acked).count())
            .unwrap_or(0)
    }

    /// Total successful acks.
    pub fn ack_count(&self) -> u64 {
        self.lock().map(|s| s.acks).unwrap_or(0)
    }

    /// Total negative acks.
    pub fn nak_count(&self) -> u64 {
        self.lock().map(|s| s.naks).unwrap_or(0)
    }

    /// Whether message `sequence` has been acked.
    pub fn is_acked(&self, sequence: u64) -> bool {
        self.lock()
            .map(|s| s.messages.iter().any(|m| m.sequence == sequence && m.acked))
            .unwrap_or(false)
    }

    /// How many times message `sequence` has been delivered.
    pub fn deliveries(&self, sequence: u64) -> u32 {
        self.lock()
            .ok()
            .and_then(|s| {
                s.messages
                    .iter()
                    .find(|m| m.sequence == sequence)
                    .map(|m| m.deliveries)
            })
            .unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().map(|s| s.dead_letters.clone()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|s| s.closed).unwrap_or(false)
    }

    /// Deliver up to `max_messages` ready messages.
    ///
    /// When none is ready, also returns when the next in-flight one will be.
    fn take_batch(&self, max_messages: usize) -> Result<(Vec<MemoryMessage>, Option<Instant>)> {
        let now = Instant::now();
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if state.closed {
            return Err(TwiderError::Stream("Stream is closed".to_string()));
        }
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Err(TwiderError::Stream("Injected fetch failure".to_string()));
        }

        let ack_wait = state.ack_wait;
        let batch: Vec<MemoryMessage> = state
            .messages
            .iter_mut()
            .filter(|m| m.is_ready(now))
            .take(max_messages)
            .map(|m| {
                m.deliveries += 1;
                m.ready_at = Some(now + ack_wait);
                MemoryMessage {
                    sequence: m.sequence,
                    subject: m.subject.clone(),
                    payload: m.payload.clone(),
                    delivery: m.deliveries,
                }
            })
            .collect();

        let next_ready = if batch.is_empty() {
            state
                .messages
                .iter()
                .filter(|m| !m.acked)
                .filter_map(|m| m.ready_at)
                .min()
        } else {
            None
        };
        Ok((batch, next_ready))
    }

    fn stored_mut<'a>(state: &'a mut State, sequence: u64) -> Result<&'a mut StoredMessage> {
        state
            .messages
            .iter_mut()
            .find(|m| m.sequence == sequence)
            .ok_or_else(|| TwiderError::Stream(format!("Unknown message sequence {}", sequence)))
    }
}

#[async_trait]
impl StreamTransport for MemoryStream {
    type Message = MemoryMessage;

    async fn fetch(&self, max_messages: usize, timeout: Duration) -> Result<Vec<MemoryMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Registered before the check so a publish in between is not missed.
            let published = self.published.notified();

            let (batch, next_ready) = self.take_batch(max_messages)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wake = next_ready.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = published => {}
                _ = tokio::time::sleep_until(wake) => {
                    if wake >= deadline {
                        return Ok(Vec::new());
                    }
                }
            }
        }
    }

    async fn ack(&self, message: &MemoryMessage) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if state.ack_failures > 0 {
            state.ack_failures -= 1;
            return Err(TwiderError::Stream("Injected ack failure".to_string()));
        }
        let stored = Self::stored_mut(state, message.sequence)?;
        if !stored.acked {
            stored.acked = true;
            state.acks += 1;
        }
        Ok(())
    }

    async fn nak(&self, message: &MemoryMessage, delay: Duration) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let stored = Self::stored_mut(state, message.sequence)?;
        if !stored.acked {
            stored.ready_at = Some(Instant::now() + delay);
            state.naks += 1;
        }
        Ok(())
    }

    async fn dead_letter(&self, message: &MemoryMessage, reason: &str) -> Result<()> {
        self.lock()?.dead_letters.push(DeadLetter {
            sequence: message.sequence,
            subject: message.subject.clone(),
            payload: message.payload.clone(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.lock()?.closed = true;
        Ok(())
    }
}
