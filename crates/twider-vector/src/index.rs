//! Vector index client trait and the in-memory implementation.
//!
//! `MemoryIndex` does brute-force scoring: cosine similarity in the dense
//! space and dot product over shared indices in the sparse space. It backs
//! tests and single-process development; production uses
//! [`QdrantIndex`](crate::qdrant::QdrantIndex).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use twider_core::config::IndexConfig;
use twider_core::error::{Result, TwiderError};
use twider_core::types::{IndexPoint, RetrievedPost, ScoredId, SparseVector, Vector};

/// Declared layout of the collection holding post points.
///
/// The dense space uses cosine distance; the sparse space has no fixed
/// dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    pub dense_name: String,
    pub dense_dim: usize,
    pub sparse_name: String,
}

impl CollectionSchema {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            name: config.collection.clone(),
            dense_name: config.dense_vector_name.clone(),
            dense_dim: config.dense_dim,
            sparse_name: config.sparse_vector_name.clone(),
        }
    }
}

/// Point store supporting upsert-by-id, per-space similarity query and
/// retrieval by id.
///
/// Implementations must be safe for concurrent use; upsert is
/// last-writer-wins per id.
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Create the collection if it does not exist.
    async fn ensure_collection(&self, schema: &CollectionSchema) -> Result<()>;

    /// Insert or overwrite points by id.
    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()>;

    /// Top-`limit` ids in the space of `vector`, best first.
    async fn query(&self, vector: &Vector, limit: u64) -> Result<Vec<ScoredId>>;

    /// Payloads for `ids`, in request order. Unknown ids are skipped.
    async fn retrieve(&self, ids: &[Uuid]) -> Result<Vec<RetrievedPost>>;

    /// Number of stored points.
    async fn count(&self) -> Result<u64>;
}

/// In-memory [`IndexClient`].
///
/// Cheap to clone; clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    points: Arc<RwLock<HashMap<Uuid, IndexPoint>>>,
    schema: Arc<RwLock<Option<CollectionSchema>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stored point by id.
    pub fn get(&self, id: &Uuid) -> Option<IndexPoint> {
        self.points.read().ok().and_then(|p| p.get(id).cloned())
    }

    fn declared_dim(&self) -> Result<Option<usize>> {
        let schema = self
            .schema
            .read()
            .map_err(|e| TwiderError::Index(format!("Lock poisoned: {}", e)))?;
        Ok(schema.as_ref().map(|s| s.dense_dim))
    }
}

#[async_trait]
impl IndexClient for MemoryIndex {
    async fn ensure_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let mut current = self
            .schema
            .write()
            .map_err(|e| TwiderError::Index(format!("Lock poisoned: {}", e)))?;
        if current.is_none() {
            *current = Some(schema.clone());
        }
        Ok(())
    }

    async fn upsert(&self, points: Vec<IndexPoint>) -> Result<()> {
        if let Some(dim) = self.declared_dim()? {
            if let Some(bad) = points.iter().find(|p| p.dense.len() != dim) {
                return Err(TwiderError::Index(format!(
                    "Point {} has dense dimension {}, collection expects {}",
                    bad.id,
                    bad.dense.len(),
                    dim
                )));
            }
        }

        let mut store = self
            .points
            .write()
            .map_err(|e| TwiderError::Index(format!("Lock poisoned: {}", e)))?;
        for point in points {
            store.insert(point.id, point);
        }
        Ok(())
    }

    async fn query(&self, vector: &Vector, limit: u64) -> Result<Vec<ScoredId>> {
        let store = self
            .points
            .read()
            .map_err(|e| TwiderError::Index(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<ScoredId> = match vector {
            Vector::Dense(query) => store
                .values()
                .map(|p| ScoredId {
                    id: p.id,
                    score: cosine_similarity(query, &p.dense),
                })
                .collect(),
            Vector::Sparse(query) => store
                .values()
                .filter_map(|p| {
                    sparse_score(query, &p.sparse).map(|score| ScoredId { id: p.id, score })
                })
                .collect(),
        };

        sort_scored(&mut scored);
        scored.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(scored)
    }

    async fn retrieve(&self, ids: &[Uuid]) -> Result<Vec<RetrievedPost>> {
        let store = self
            .points
            .read()
            .map_err(|e| TwiderError::Index(format!("Lock poisoned: {}", e)))?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                store.get(id).map(|p| RetrievedPost {
                    id: p.id,
                    payload: p.payload.clone(),
                })
            })
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        let store = self
            .points
            .read()
            .map_err(|e| TwiderError::Index(format!("Lock poisoned: {}", e)))?;
        Ok(store.len() as u64)
    }
}

/// Descending score, ties by ascending id.
pub(crate) fn sort_scored(scored: &mut [ScoredId]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Sparse matches with no shared term are not candidates.
fn sparse_score(query: &SparseVector, doc: &SparseVector) -> Option<f64> {
    let score = query.dot(doc);
    if score > 0.0 {
        Some(score)
    } else {
        None
    }
}

/// Cosine similarity; 0.0 if either vector has zero magnitude or the
/// lengths differ.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use twider_core::types::PostPayload;

    fn point(id: Uuid, dense: Vec<f32>, sparse: Vec<(u32, f32)>, content: &str) -> IndexPoint {
        IndexPoint {
            id,
            dense,
            sparse: SparseVector::from_pairs(sparse),
            payload: PostPayload {
                content: content.to_string(),
                media_urls: vec![],
            },
        }
    }

    fn schema(dim: usize) -> CollectionSchema {
        CollectionSchema {
            name: "posts".into(),
            dense_name: "dense".into(),
            dense_dim: dim,
            sparse_name: "sparse".into(),
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let index = MemoryIndex::new();
        let id = Uuid::new_v4();
        index
            .upsert(vec![point(id, vec![1.0, 0.0], vec![], "first")])
            .await
            .unwrap();
        index
            .upsert(vec![point(id, vec![0.0, 1.0], vec![], "second")])
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(index.get(&id).unwrap().payload.content, "second");
    }

    #[tokio::test]
    async fn test_dense_query_orders_by_cosine() {
        let index = MemoryIndex::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        index
            .upsert(vec![
                point(a, vec![1.0, 0.0], vec![], "a"),
                point(b, vec![0.7, 0.7], vec![], "b"),
                point(c, vec![0.0, 1.0], vec![], "c"),
            ])
            .await
            .unwrap();

        let hits = index.query(&Vector::Dense(vec![1.0, 0.0]), 2).await.unwrap();
        let ids: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sparse_query_skips_disjoint_points() {
        let index = MemoryIndex::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        index
            .upsert(vec![
                point(a, vec![1.0], vec![(1, 1.0), (5, 2.0)], "a"),
                point(b, vec![1.0], vec![(9, 3.0)], "b"),
            ])
            .await
            .unwrap();

        let query = Vector::Sparse(SparseVector::from_pairs(vec![(5, 1.0)]));
        let hits = index.query(&query, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a);
        assert!((hits[0].score - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_query_ties_broken_by_id() {
        let index = MemoryIndex::new();
        let mut ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let points = ids
            .iter()
            .map(|id| point(*id, vec![1.0, 0.0], vec![], "same"))
            .collect();
        index.upsert(points).await.unwrap();

        let hits = index.query(&Vector::Dense(vec![1.0, 0.0]), 10).await.unwrap();
        ids.sort();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), ids);
    }

    #[tokio::test]
    async fn test_retrieve_follows_request_order_and_skips_unknown() {
        let index = MemoryIndex::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        index
            .upsert(vec![
                point(a, vec![1.0], vec![], "a"),
                point(b, vec![1.0], vec![], "b"),
            ])
            .await
            .unwrap();

        let posts = index.retrieve(&[b, Uuid::new_v4(), a]).await.unwrap();
        let contents: Vec<&str> = posts.iter().map(|p| p.payload.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_schema_rejects_wrong_dimension() {
        let index = MemoryIndex::new();
        index.ensure_collection(&schema(3)).await.unwrap();

        let err = index
            .upsert(vec![point(Uuid::new_v4(), vec![1.0, 0.0], vec![], "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, TwiderError::Index(_)));
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ensure_collection_is_idempotent() {
        let index = MemoryIndex::new();
        index.ensure_collection(&schema(2)).await.unwrap();
        index.ensure_collection(&schema(2)).await.unwrap();
        index
            .upsert(vec![point(Uuid::new_v4(), vec![1.0, 0.0], vec![], "x")])
            .await
            .unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[test]
    fn test_schema_from_config() {
        let config = IndexConfig::default();
        let schema = CollectionSchema::from_config(&config);
        assert_eq!(schema.name, "posts");
        assert_eq!(schema.dense_dim, 384);
        assert_eq!(schema.sparse_name, "sparse");
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }
}
