//! NATS JetStream transport.
//!
//! Binds a durable pull consumer with explicit acks to a subject-filtered
//! stream, creating both on first connect if they do not exist.

use std::time::Duration;

use async_nats::jetstream::{
    self, consumer::pull, consumer::AckPolicy, consumer::PullConsumer, AckKind,
};
use async_nats::HeaderMap;
use async_trait::async_trait;
use chrono::Utc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use twider_core::config::StreamConfig;
use twider_core::error::{Result, TwiderError};

use crate::transport::{StreamMessage, StreamTransport};

/// Header carrying the reason a message was dead-lettered.
pub const DEAD_LETTER_REASON_HEADER: &str = "Twider-Dead-Letter-Reason";
/// Header carrying the original subject of a dead-lettered message.
pub const DEAD_LETTER_SUBJECT_HEADER: &str = "Twider-Original-Subject";
/// Header carrying the RFC 3339 time a message was dead-lettered.
pub const DEAD_LETTER_AT_HEADER: &str = "Twider-Dead-Lettered-At";

/// A message pulled from JetStream.
pub struct NatsMessage(jetstream::Message);

impl StreamMessage for NatsMessage {
    fn subject(&self) -> &str {
        self.0.subject.as_str()
    }

    fn payload(&self) -> &[u8] {
        &self.0.payload
    }
}

/// JetStream durable pull consumer.
pub struct NatsTransport {
    client: async_nats::Client,
    consumer: PullConsumer,
    dead_letter_subject: String,
}

impl std::fmt::Debug for NatsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsTransport")
            .field("dead_letter_subject", &self.dead_letter_subject)
            .finish()
    }
}

impl NatsTransport {
    /// Connect and bind the durable consumer.
    ///
    /// Any failure here is fatal for the consumer instance.
    pub async fn connect(config: &StreamConfig) -> Result<Self> {
        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(|e| TwiderError::Stream(format!("Connect to {}: {}", config.url, e)))?;
        let context = jetstream::new(client.clone());

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream_name.clone(),
                subjects: vec![config.subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(|e| {
                TwiderError::Stream(format!("Stream {}: {}", config.stream_name, e))
            })?;

        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &config.durable_name,
                pull::Config {
                    durable_name: Some(config.durable_name.clone()),
                    filter_subject: config.subject.clone(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                TwiderError::Stream(format!("Consumer {}: {}", config.durable_name, e))
            })?;

        info!(
            url = %config.url,
            stream = %config.stream_name,
            subject = %config.subject,
            durable = %config.durable_name,
            "Connected to JetStream"
        );

        Ok(Self {
            client,
            consumer,
            dead_letter_subject: config.dead_letter_subject.clone(),
        })
    }
}

#[async_trait]
impl StreamTransport for NatsTransport {
    type Message = NatsMessage;

    async fn fetch(&self, max_messages: usize, timeout: Duration) -> Result<Vec<NatsMessage>> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(timeout)
            .messages()
            .await
            .map_err(|e| TwiderError::Stream(format!("Fetch failed: {}", e)))?;

        let mut messages = Vec::with_capacity(max_messages);
        while let Some(item) = batch.next().await {
            match item {
                Ok(message) => messages.push(NatsMessage(message)),
                Err(e) if messages.is_empty() => {
                    return Err(TwiderError::Stream(format!("Fetch failed: {}", e)));
                }
                Err(e) => {
                    warn!(error = %e, received = messages.len(), "Batch ended early");
                    break;
                }
            }
        }

        Ok(messages)
    }

    async fn ack(&self, message: &NatsMessage) -> Result<()> {
        message
            .0
            .ack()
            .await
            .map_err(|e| TwiderError::Stream(format!("Ack failed: {}", e)))
    }

    async fn nak(&self, message: &NatsMessage, delay: Duration) -> Result<()> {
        message
            .0
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| TwiderError::Stream(format!("Nak failed: {}", e)))
    }

    async fn dead_letter(&self, message: &NatsMessage, reason: &str) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(DEAD_LETTER_REASON_HEADER, reason);
        headers.insert(DEAD_LETTER_SUBJECT_HEADER, message.subject());
        headers.insert(DEAD_LETTER_AT_HEADER, Utc::now().to_rfc3339().as_str());

        self.client
            .publish_with_headers(
                self.dead_letter_subject.clone(),
                headers,
                message.0.payload.clone(),
            )
            .await
            .map_err(|e| TwiderError::Stream(format!("Dead-letter publish failed: {}", e)))?;
        self.client
            .flush()
            .await
            .map_err(|e| TwiderError::Stream(format!("Dead-letter flush failed: {}", e)))?;

        debug!(subject = %self.dead_letter_subject, reason, "Message dead-lettered");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.client
            .drain()
            .await
            .map_err(|e| TwiderError::Stream(format!("Drain failed: {}", e)))?;
        info!("JetStream connection drained");
        Ok(())
    }
}
