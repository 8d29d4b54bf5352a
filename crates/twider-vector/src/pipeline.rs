//! Twider indexing pipeline.
//!
//! Turns a batch of raw "post created" messages into index points:
//! decode, embed into both vector spaces, then one upsert for the batch.
//! Re-running a batch overwrites the same point ids, so redelivery is safe.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use twider_core::config::PoisonPolicy;
use twider_core::error::{Result, TwiderError};
use twider_core::types::{IndexPoint, PostCreatedEvent};

use crate::embedding::{embed_both, DynEmbeddingService};
use crate::index::IndexClient;

/// A message that could not be decoded into an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedMessage {
    /// Position of the message within its batch.
    pub position: usize,
    pub reason: String,
}

/// Result of decoding one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBatch {
    pub events: Vec<PostCreatedEvent>,
    pub rejected: Vec<RejectedMessage>,
}

/// Outcome of a successfully processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Number of points upserted.
    pub indexed: usize,
    /// Messages to route to the dead-letter path. Always empty under
    /// [`PoisonPolicy::FailBatch`].
    pub rejected: Vec<RejectedMessage>,
}

/// Decode raw message payloads.
///
/// Under [`PoisonPolicy::FailBatch`] the first undecodable payload fails the
/// whole batch with [`TwiderError::Decode`]. Under
/// [`PoisonPolicy::DeadLetter`] it is reported in `rejected` and the rest of
/// the batch decodes normally.
pub fn decode_batch<P: AsRef<[u8]>>(payloads: &[P], policy: PoisonPolicy) -> Result<DecodedBatch> {
    let mut batch = DecodedBatch::default();

    for (position, payload) in payloads.iter().enumerate() {
        match PostCreatedEvent::from_json(payload.as_ref()) {
            Ok(event) => batch.events.push(event),
            Err(e) => match policy {
                PoisonPolicy::FailBatch => {
                    return Err(TwiderError::Decode(format!(
                        "message {} of {}: {}",
                        position,
                        payloads.len(),
                        e
                    )));
                }
                PoisonPolicy::DeadLetter => {
                    warn!(position, error = %e, "Rejecting undecodable message");
                    batch.rejected.push(RejectedMessage {
                        position,
                        reason: e.to_string(),
                    });
                }
            },
        }
    }

    Ok(batch)
}

/// Keep one event per id, the last one in batch order.
fn last_occurrence_wins(events: Vec<PostCreatedEvent>) -> Vec<PostCreatedEvent> {
    let mut last: HashMap<Uuid, usize> = HashMap::with_capacity(events.len());
    for (pos, event) in events.iter().enumerate() {
        last.insert(event.id, pos);
    }
    events
        .into_iter()
        .enumerate()
        .filter(|(pos, event)| last.get(&event.id) == Some(pos))
        .map(|(_, event)| event)
        .collect()
}

/// The indexing pipeline.
///
/// Processes a batch through:
/// 1. Decoding, per the configured [`PoisonPolicy`]
/// 2. Dense and sparse embedding of each event's content
/// 3. A single index upsert for the batch
///
/// Any embedding or index failure fails the batch; nothing is partially
/// reported as done.
pub struct IndexingPipeline {
    index: Arc<dyn IndexClient>,
    embedder: Arc<dyn DynEmbeddingService>,
    policy: PoisonPolicy,
}

impl IndexingPipeline {
    pub fn new(
        index: Arc<dyn IndexClient>,
        embedder: Arc<dyn DynEmbeddingService>,
        policy: PoisonPolicy,
    ) -> Self {
        Self {
            index,
            embedder,
            policy,
        }
    }

    pub fn policy(&self) -> PoisonPolicy {
        self.policy
    }

    /// Embed and upsert decoded events. Returns the number of points written.
    pub async fn index_events(&self, events: Vec<PostCreatedEvent>) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let received = events.len();
        let events = last_occurrence_wins(events);
        if events.len() < received {
            debug!(
                received,
                unique = events.len(),
                "Collapsed repeated ids within batch"
            );
        }

        let mut points = Vec::with_capacity(events.len());
        for event in events {
            let (dense, sparse) = embed_both(self.embedder.as_ref(), &event.content).await?;
            points.push(IndexPoint::from_event(event, dense, sparse));
        }

        let count = points.len();
        self.index.upsert(points).await?;
        Ok(count)
    }

    /// Decode, embed and upsert one batch of raw payloads.
    pub async fn process<P: AsRef<[u8]>>(&self, payloads: &[P]) -> Result<IngestReport> {
        let decoded = decode_batch(payloads, self.policy)?;
        let indexed = self.index_events(decoded.events).await?;

        info!(
            indexed,
            rejected = decoded.rejected.len(),
            "Batch indexed"
        );

        Ok(IngestReport {
            indexed,
            rejected: decoded.rejected,
        })
    }
}
