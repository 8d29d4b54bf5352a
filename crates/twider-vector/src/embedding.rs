//! Embedding service trait and implementations.
//!
//! - `OnnxEmbeddingService` runs two ONNX models through ort: a
//!   sentence-transformer (e.g. all-MiniLM-L6-v2) for the dense space and a
//!   SPLADE model (e.g. Splade_PP_en_v1) for the sparse space.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::Tokenizer;
use tracing::info;

use twider_core::error::{Result, TwiderError};
use twider_core::types::{SparseVector, Vector, VectorSpace};

/// Dense dimension of all-MiniLM-L6-v2, used when the model does not declare one.
pub const DEFAULT_DENSE_DIMENSIONS: usize = 384;

/// Service for turning text into vectors.
///
/// The same service must be used at ingestion and at query time, otherwise
/// the two sides of the index live in different spaces.
pub trait EmbeddingService: Send + Sync {
    /// Embed `text` into the requested vector space.
    fn embed(
        &self,
        text: &str,
        space: VectorSpace,
    ) -> impl std::future::Future<Output = Result<Vector>> + Send;

    /// Dimensionality of vectors in the dense space.
    fn dense_dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService::embed` returns `impl Future` and so is not object-safe.
/// Every `EmbeddingService` implements this trait through the blanket impl
/// below.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
        space: VectorSpace,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vector>> + Send + 'a>>;

    fn dense_dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
        space: VectorSpace,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vector>> + Send + 'a>> {
        Box::pin(self.embed(text, space))
    }

    fn dense_dimensions(&self) -> usize {
        EmbeddingService::dense_dimensions(self)
    }
}

/// Embed `text` into both spaces concurrently.
pub async fn embed_both(
    embedder: &dyn DynEmbeddingService,
    text: &str,
) -> Result<(Vec<f32>, SparseVector)> {
    let (dense, sparse) = tokio::try_join!(
        embedder.embed_boxed(text, VectorSpace::Dense),
        embedder.embed_boxed(text, VectorSpace::Sparse),
    )?;
    Ok((dense.into_dense()?, sparse.into_sparse()?))
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService
// ---------------------------------------------------------------------------

/// A tokenizer plus ONNX session producing token-level outputs.
///
/// The model must accept `input_ids`, `attention_mask` and `token_type_ids`
/// as i64 inputs of shape `[1, seq_len]` and return a `[1, seq_len, width]`
/// tensor as its first output. `width` is the hidden size for a
/// sentence-transformer and the vocabulary size for SPLADE.
#[derive(Clone)]
struct OnnxEncoder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
}

/// Raw token-level model output for one input text.
struct TokenOutput {
    attention_mask: Vec<i64>,
    width: usize,
    data: Vec<f32>,
}

impl OnnxEncoder {
    fn load(model_dir: &Path) -> Result<(Self, Option<usize>)> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        if !model_path.exists() {
            return Err(TwiderError::Embedding(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(TwiderError::Embedding(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| TwiderError::Embedding(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| TwiderError::Embedding(format!("ONNX set threads: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| TwiderError::Embedding(format!("ONNX load model: {}", e)))?;

        ensure_has_output(session.outputs().len())?;

        // [batch, seq_len, width]; dynamic axes report -1.
        let width = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .and_then(|d| if d > 0 { Some(d as usize) } else { None });

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| TwiderError::Embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(model = %model_path.display(), ?width, "Loaded ONNX model");

        Ok((
            Self {
                session: Arc::new(Mutex::new(session)),
                tokenizer: Arc::new(tokenizer),
            },
            width,
        ))
    }

    fn run(&self, text: &str) -> Result<TokenOutput> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| TwiderError::Embedding(format!("Tokenization failed: {}", e)))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();
        let seq_len = input_ids.len();

        let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| TwiderError::Embedding(format!("input_ids array: {}", e)))?;
        let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(|e| TwiderError::Embedding(format!("attention_mask array: {}", e)))?;
        let type_array = ndarray::Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(|e| TwiderError::Embedding(format!("token_type_ids array: {}", e)))?;

        let ids_ref = TensorRef::from_array_view(&ids_array)
            .map_err(|e| TwiderError::Embedding(format!("TensorRef input_ids: {}", e)))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| TwiderError::Embedding(format!("TensorRef attention_mask: {}", e)))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(|e| TwiderError::Embedding(format!("TensorRef token_type_ids: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| TwiderError::Embedding(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| TwiderError::Embedding(format!("ONNX inference failed: {}", e)))?;

        ensure_has_output(outputs.len())?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| TwiderError::Embedding(format!("Extract output: {}", e)))?;

        let dims: Vec<i64> = shape.iter().copied().collect();
        let width = match dims.as_slice() {
            [_, seq, width] if *seq as usize == seq_len && *width > 0 => *width as usize,
            _ => {
                return Err(TwiderError::Embedding(format!(
                    "Unexpected output shape: {:?}",
                    dims
                )))
            }
        };

        Ok(TokenOutput {
            attention_mask,
            width,
            data: data.to_vec(),
        })
    }
}

/// Encoders read their token embeddings from the first model output.
fn ensure_has_output(count: usize) -> Result<()> {
    if count == 0 {
        return Err(TwiderError::Embedding("ONNX model has no outputs".into()));
    }
    Ok(())
}

/// Masked mean pooling followed by L2 normalisation.
fn mean_pool(output: &TokenOutput) -> Vec<f32> {
    let width = output.width;
    let mut pooled = vec![0.0f32; width];
    let mut count = 0.0f32;

    for (tok_idx, &mask_val) in output.attention_mask.iter().enumerate() {
        if mask_val > 0 {
            let row = &output.data[tok_idx * width..(tok_idx + 1) * width];
            for (acc, v) in pooled.iter_mut().zip(row) {
                *acc += v;
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for val in &mut pooled {
            *val /= count;
        }
    }

    let norm: f32 = pooled.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in &mut pooled {
            *val /= norm;
        }
    }

    pooled
}

/// SPLADE pooling: per vocabulary term, `max over tokens of log(1 + relu(logit))`.
///
/// Only non-zero weights are kept.
fn splade_pool(output: &TokenOutput) -> SparseVector {
    let width = output.width;
    let mut weights = vec![0.0f32; width];

    for (tok_idx, &mask_val) in output.attention_mask.iter().enumerate() {
        if mask_val == 0 {
            continue;
        }
        let row = &output.data[tok_idx * width..(tok_idx + 1) * width];
        for (w, &logit) in weights.iter_mut().zip(row) {
            let activated = logit.max(0.0).ln_1p();
            if activated > *w {
                *w = activated;
            }
        }
    }

    SparseVector::from_pairs(
        weights
            .into_iter()
            .enumerate()
            .filter(|(_, w)| *w > 0.0)
            .map(|(idx, w)| (idx as u32, w)),
    )
}

/// ONNX Runtime-backed embedding service with one model per vector space.
///
/// Each model directory must contain `model.onnx` and `tokenizer.json`.
#[derive(Clone)]
pub struct OnnxEmbeddingService {
    dense: OnnxEncoder,
    sparse: OnnxEncoder,
    dimensions: usize,
}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OnnxEmbeddingService {
    /// Load the dense and sparse models from their directories.
    pub fn from_directories(dense_dir: &Path, sparse_dir: &Path) -> Result<Self> {
        let (dense, dense_width) = OnnxEncoder::load(dense_dir)?;
        let (sparse, _) = OnnxEncoder::load(sparse_dir)?;
        let dimensions = dense_width.unwrap_or(DEFAULT_DENSE_DIMENSIONS);

        info!(dimensions, "ONNX embedding service ready");

        Ok(Self {
            dense,
            sparse,
            dimensions,
        })
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str, space: VectorSpace) -> Result<Vector> {
        // Inference is CPU-bound; keep it off the async workers.
        let encoder = match space {
            VectorSpace::Dense => self.dense.clone(),
            VectorSpace::Sparse => self.sparse.clone(),
        };
        let text_owned = text.to_string();

        tokio::task::spawn_blocking(move || {
            let output = encoder.run(&text_owned)?;
            Ok(match space {
                VectorSpace::Dense => Vector::Dense(mean_pool(&output)),
                VectorSpace::Sparse => Vector::Sparse(splade_pool(&output)),
            })
        })
        .await
        .map_err(|e| TwiderError::Embedding(format!("Embedding task panicked: {}", e)))?
    }

    fn dense_dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding
// ---------------------------------------------------------------------------

/// Deterministic embeddings for tests and model-less development.
///
/// Dense vectors are unit vectors derived from a hash of the whole text, so
/// identical inputs always produce identical outputs. Sparse vectors are term
/// frequencies over lowercase word tokens hashed into `u32` indices, which
/// gives texts sharing a word a positive sparse score.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(DEFAULT_DENSE_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        if text.is_empty() {
            return vec![0.0; self.dimensions];
        }

        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }
        result
    }

    fn term_vector(text: &str) -> SparseVector {
        SparseVector::from_pairs(
            text.split(|c: char| !c.is_alphanumeric())
                .filter(|token| !token.is_empty())
                .map(|token| {
                    let mut hasher = DefaultHasher::new();
                    token.to_lowercase().hash(&mut hasher);
                    (hasher.finish() as u32, 1.0)
                }),
        )
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str, space: VectorSpace) -> Result<Vector> {
        Ok(match space {
            VectorSpace::Dense => Vector::Dense(self.hash_to_vector(text)),
            VectorSpace::Sparse => Vector::Sparse(Self::term_vector(text)),
        })
    }

    fn dense_dimensions(&self) -> usize {
        self.dimensions
    }
}
