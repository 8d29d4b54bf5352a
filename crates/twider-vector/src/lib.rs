//! Twider vector crate - embeddings, index clients, fusion, hybrid search and
//! the indexing pipeline.
//!
//! Provides an embedding service trait with ONNX and mock implementations,
//! an index client trait with in-memory and Qdrant backends, Reciprocal Rank
//! Fusion, the hybrid query engine and the batch indexing pipeline.

pub mod embedding;
pub mod fusion;
pub mod index;
pub mod pipeline;
pub mod qdrant;
pub mod search;

pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService};
pub use fusion::{paginate, reciprocal_rank_fusion, FusedHit, RRF_K};
pub use index::{CollectionSchema, IndexClient, MemoryIndex};
pub use pipeline::{decode_batch, DecodedBatch, IndexingPipeline, IngestReport, RejectedMessage};
pub use qdrant::QdrantIndex;
pub use search::HybridSearcher;
