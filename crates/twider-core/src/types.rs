//! Domain types shared by ingestion, indexing and search.
//!
//! The ingestion unit is [`PostCreatedEvent`], which the indexing pipeline
//! turns into one [`IndexPoint`] per event. The query side works with
//! [`SearchQuery`], [`ScoredId`] and [`RetrievedPost`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TwiderError};

/// Hard upper bound on the page size of a search request.
pub const MAX_SEARCH_LIMIT: u64 = 100;

/// Page size used when a search request does not specify one.
pub const DEFAULT_SEARCH_LIMIT: u64 = 15;

// =============================================================================
// Ingestion
// =============================================================================

/// A "post created" event as published on the stream.
///
/// The wire format uses PascalCase field names (`Id`, `Content`,
/// `MediaUrls`). Snake and camel case names are accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PostCreatedEvent {
    /// Stable post id. Doubles as the index point id.
    #[serde(alias = "id")]
    pub id: Uuid,
    /// Text body used to derive both vector representations.
    #[serde(alias = "content")]
    pub content: String,
    /// Opaque media references, carried through unchanged.
    #[serde(alias = "media_urls", alias = "mediaUrls")]
    pub media_urls: Vec<Uuid>,
}

impl PostCreatedEvent {
    /// Decode an event from a raw JSON message payload.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| TwiderError::Decode(e.to_string()))
    }
}

// =============================================================================
// Vectors
// =============================================================================

/// The two vector spaces every post is indexed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorSpace {
    Dense,
    Sparse,
}

impl VectorSpace {
    pub const ALL: [VectorSpace; 2] = [VectorSpace::Dense, VectorSpace::Sparse];
}

impl fmt::Display for VectorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorSpace::Dense => write!(f, "dense"),
            VectorSpace::Sparse => write!(f, "sparse"),
        }
    }
}

/// A sparse vector in coordinate form.
///
/// Indices are kept sorted and unique; duplicate indices are summed on
/// construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Build a sparse vector from parallel index/value arrays.
    pub fn new(indices: Vec<u32>, values: Vec<f32>) -> Result<Self> {
        if indices.len() != values.len() {
            return Err(TwiderError::Embedding(format!(
                "Sparse vector has {} indices but {} values",
                indices.len(),
                values.len()
            )));
        }
        Ok(Self::from_pairs(indices.into_iter().zip(values)))
    }

    /// Build a sparse vector from `(index, value)` pairs in any order.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, f32)>) -> Self {
        let mut pairs: Vec<(u32, f32)> = pairs.into_iter().collect();
        pairs.sort_by_key(|(idx, _)| *idx);

        let mut indices: Vec<u32> = Vec::with_capacity(pairs.len());
        let mut values: Vec<f32> = Vec::with_capacity(pairs.len());
        for (idx, val) in pairs {
            if indices.last() == Some(&idx) {
                if let Some(last) = values.last_mut() {
                    *last += val;
                }
            } else {
                indices.push(idx);
                values.push(val);
            }
        }

        Self { indices, values }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product over the indices both vectors share.
    pub fn dot(&self, other: &SparseVector) -> f64 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0f64;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] as f64 * other.values[j] as f64;
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// A vector in one of the two spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Vector {
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

impl Vector {
    pub fn space(&self) -> VectorSpace {
        match self {
            Vector::Dense(_) => VectorSpace::Dense,
            Vector::Sparse(_) => VectorSpace::Sparse,
        }
    }

    pub fn into_dense(self) -> Result<Vec<f32>> {
        match self {
            Vector::Dense(v) => Ok(v),
            Vector::Sparse(_) => Err(TwiderError::Embedding(
                "Expected a dense vector, got a sparse one".to_string(),
            )),
        }
    }

    pub fn into_sparse(self) -> Result<SparseVector> {
        match self {
            Vector::Sparse(v) => Ok(v),
            Vector::Dense(_) => Err(TwiderError::Embedding(
                "Expected a sparse vector, got a dense one".to_string(),
            )),
        }
    }
}

// =============================================================================
// Index points
// =============================================================================

/// Payload stored alongside each point and returned verbatim on retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPayload {
    pub content: String,
    pub media_urls: Vec<String>,
}

/// The unit written to the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPoint {
    pub id: Uuid,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub payload: PostPayload,
}

impl IndexPoint {
    /// Assemble a point from an event and its two embeddings.
    pub fn from_event(event: PostCreatedEvent, dense: Vec<f32>, sparse: SparseVector) -> Self {
        let payload = PostPayload {
            content: event.content,
            media_urls: event.media_urls.iter().map(Uuid::to_string).collect(),
        };
        Self {
            id: event.id,
            dense,
            sparse,
            payload,
        }
    }
}

/// One entry of a ranked candidate list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: Uuid,
    pub score: f64,
}

/// A point resolved back to its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedPost {
    pub id: Uuid,
    #[serde(flatten)]
    pub payload: PostPayload,
}

// =============================================================================
// Queries
// =============================================================================

/// A validated search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub text: String,
    pub offset: u64,
    pub limit: u64,
}

impl SearchQuery {
    /// Validate and build a query: `offset >= 0`, `1 <= limit <= 100`.
    pub fn new(text: impl Into<String>, offset: i64, limit: i64) -> Result<Self> {
        Self::with_max_limit(text, offset, limit, MAX_SEARCH_LIMIT)
    }

    /// Like [`SearchQuery::new`] with a tighter page size ceiling.
    ///
    /// The ceiling itself is clamped to [`MAX_SEARCH_LIMIT`].
    pub fn with_max_limit(
        text: impl Into<String>,
        offset: i64,
        limit: i64,
        max_limit: u64,
    ) -> Result<Self> {
        let max_limit = max_limit.clamp(1, MAX_SEARCH_LIMIT);

        if offset < 0 {
            return Err(TwiderError::Validation(format!(
                "offset must be >= 0, got {}",
                offset
            )));
        }
        if limit < 1 || limit as u64 > max_limit {
            return Err(TwiderError::Validation(format!(
                "limit must be between 1 and {}, got {}",
                max_limit, limit
            )));
        }

        Ok(Self {
            text: text.into(),
            offset: offset as u64,
            limit: limit as u64,
        })
    }

    /// Index one past the last fused position this page covers.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.limit)
    }
}
