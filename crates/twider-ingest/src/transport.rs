//! Stream transport abstraction.
//!
//! The consumer needs a bounded-wait fetch, per-message ack and nak,
//! dead-lettering and close from a durable pull stream. Messages that are
//! fetched but never acked are redelivered by the transport once their ack
//! wait expires; a nak makes them eligible sooner.

use std::time::Duration;

use async_trait::async_trait;

use twider_core::error::Result;

/// A message delivered by a [`StreamTransport`].
pub trait StreamMessage: Send + Sync {
    /// Subject the message was published on.
    fn subject(&self) -> &str;

    /// Raw message body.
    fn payload(&self) -> &[u8];
}

/// A durable, subject-filtered, at-least-once pull stream.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    type Message: StreamMessage;

    /// Pull up to `max_messages`, waiting at most `timeout`.
    ///
    /// Returns an empty vec when nothing arrives in time.
    async fn fetch(&self, max_messages: usize, timeout: Duration) -> Result<Vec<Self::Message>>;

    /// Acknowledge one message so it is never redelivered.
    async fn ack(&self, message: &Self::Message) -> Result<()>;

    /// Negatively acknowledge one message: redeliver it after `delay`.
    async fn nak(&self, message: &Self::Message, delay: Duration) -> Result<()>;

    /// Republish an unprocessable message on the dead-letter path.
    ///
    /// The original is not acked here.
    async fn dead_letter(&self, message: &Self::Message, reason: &str) -> Result<()>;

    /// Release the connection. Unacked messages stay pending.
    async fn close(&self) -> Result<()>;
}
