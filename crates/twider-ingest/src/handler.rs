//! Batch handler seam between the consumer and the indexing pipeline.

use std::sync::Arc;

use async_trait::async_trait;

use twider_core::error::Result;
use twider_vector::pipeline::{IndexingPipeline, IngestReport};

/// Processes one fetched batch as a unit.
///
/// Returning `Ok` means every effect of the batch is durable and all of its
/// messages may be acked. Returning `Err` leaves the whole batch
/// unacknowledged, so implementations must be safe to re-run on the same
/// input.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payloads: &[&[u8]]) -> Result<IngestReport>;
}

#[async_trait]
impl MessageHandler for IndexingPipeline {
    async fn handle(&self, payloads: &[&[u8]]) -> Result<IngestReport> {
        self.process(payloads).await
    }
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    async fn handle(&self, payloads: &[&[u8]]) -> Result<IngestReport> {
        (**self).handle(payloads).await
    }
}
