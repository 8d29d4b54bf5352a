//! Hybrid query engine.
//!
//! `HybridSearcher` embeds the query text into both vector spaces, runs one
//! prefetch per space against the index, fuses the two rankings with RRF and
//! slices out the requested page.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use twider_core::config::IndexConfig;
use twider_core::error::Result;
use twider_core::types::{RetrievedPost, SearchQuery, Vector};

use crate::embedding::{embed_both, DynEmbeddingService};
use crate::fusion::{paginate, reciprocal_rank_fusion, FusedHit, RRF_K};
use crate::index::IndexClient;

/// Default over-fetch multiplier for each prefetch list.
pub const DEFAULT_PREFETCH_FACTOR: u64 = 2;

/// Default ceiling on the length of each prefetch list.
pub const DEFAULT_MAX_PREFETCH: u64 = 1000;

/// Dense + sparse retrieval fused with Reciprocal Rank Fusion.
///
/// Holds no mutable state; concurrent searches share one instance.
pub struct HybridSearcher {
    index: Arc<dyn IndexClient>,
    embedder: Arc<dyn DynEmbeddingService>,
    prefetch_factor: u64,
    max_prefetch: u64,
    rrf_k: u32,
}

impl HybridSearcher {
    pub fn new(index: Arc<dyn IndexClient>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self {
            index,
            embedder,
            prefetch_factor: DEFAULT_PREFETCH_FACTOR,
            max_prefetch: DEFAULT_MAX_PREFETCH,
            rrf_k: RRF_K,
        }
    }

    pub fn from_config(
        index: Arc<dyn IndexClient>,
        embedder: Arc<dyn DynEmbeddingService>,
        config: &IndexConfig,
    ) -> Self {
        Self::new(index, embedder)
            .with_prefetch_factor(config.prefetch_factor)
            .with_max_prefetch(config.max_prefetch)
            .with_rrf_k(config.rrf_k)
    }

    /// Values below 1 are raised to 1.
    pub fn with_prefetch_factor(mut self, factor: u64) -> Self {
        self.prefetch_factor = factor.max(1);
        self
    }

    /// Values below 1 are raised to 1.
    pub fn with_max_prefetch(mut self, max: u64) -> Self {
        self.max_prefetch = max.max(1);
        self
    }

    pub fn with_rrf_k(mut self, k: u32) -> Self {
        self.rrf_k = k;
        self
    }

    /// Candidates requested from each vector space for `query`.
    ///
    /// `(offset + limit) * prefetch_factor`, capped at `max_prefetch`.
    /// Fused positions at or past the cap are never served.
    pub fn prefetch_depth(&self, query: &SearchQuery) -> u64 {
        query
            .end()
            .saturating_mul(self.prefetch_factor)
            .min(self.max_prefetch)
    }

    /// Fused ranking for the requested page, with RRF scores.
    pub async fn search_scored(&self, query: &SearchQuery) -> Result<Vec<FusedHit>> {
        if query.offset >= self.max_prefetch {
            debug!(
                offset = query.offset,
                max_prefetch = self.max_prefetch,
                "Page starts past the prefetch ceiling"
            );
            return Ok(Vec::new());
        }

        let (dense, sparse) = embed_both(self.embedder.as_ref(), &query.text).await?;
        let depth = self.prefetch_depth(query);

        let dense = Vector::Dense(dense);
        let sparse = Vector::Sparse(sparse);
        let (dense_hits, sparse_hits) = tokio::try_join!(
            self.index.query(&dense, depth),
            self.index.query(&sparse, depth),
        )?;

        debug!(
            query = %query.text,
            depth,
            dense = dense_hits.len(),
            sparse = sparse_hits.len(),
            "Prefetch complete"
        );

        let lists = [
            dense_hits.into_iter().map(|h| h.id).collect::<Vec<Uuid>>(),
            sparse_hits.into_iter().map(|h| h.id).collect::<Vec<Uuid>>(),
        ];
        let fused = reciprocal_rank_fusion(&lists, self.rrf_k);
        Ok(paginate(fused, query.offset, query.limit))
    }

    /// Ordered ids for the requested page.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Uuid>> {
        Ok(self
            .search_scored(query)
            .await?
            .into_iter()
            .map(|hit| hit.id)
            .collect())
    }

    /// The requested page resolved to payloads, in fused order.
    pub async fn search_posts(&self, query: &SearchQuery) -> Result<Vec<RetrievedPost>> {
        let ids = self.search(query).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.index.retrieve(&ids).await
    }
}
