use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TwiderError};
use crate::types::{DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT};

/// Top-level configuration for the Twider search service.
///
/// Loaded from `twider.toml` by default. Each section corresponds to one
/// external collaborator or to the HTTP surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwiderConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl TwiderConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TwiderConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject settings that would make the service misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.stream.batch_size == 0 {
            return Err(TwiderError::Config("stream.batch_size must be > 0".into()));
        }
        if self.stream.fetch_timeout_ms == 0 {
            return Err(TwiderError::Config(
                "stream.fetch_timeout_ms must be > 0".into(),
            ));
        }
        for (key, value) in [
            ("stream.stream_name", &self.stream.stream_name),
            ("stream.subject", &self.stream.subject),
            ("stream.durable_name", &self.stream.durable_name),
            ("index.collection", &self.index.collection),
            ("index.dense_vector_name", &self.index.dense_vector_name),
            ("index.sparse_vector_name", &self.index.sparse_vector_name),
        ] {
            if value.trim().is_empty() {
                return Err(TwiderError::Config(format!("{} must not be empty", key)));
            }
        }
        if self.index.dense_vector_name == self.index.sparse_vector_name {
            return Err(TwiderError::Config(
                "index.dense_vector_name and index.sparse_vector_name must differ".into(),
            ));
        }
        if self.index.dense_dim == 0 {
            return Err(TwiderError::Config("index.dense_dim must be > 0".into()));
        }
        if self.index.prefetch_factor == 0 {
            return Err(TwiderError::Config(
                "index.prefetch_factor must be >= 1".into(),
            ));
        }
        if self.index.max_prefetch < self.api.max_limit {
            return Err(TwiderError::Config(
                "index.max_prefetch must be >= api.max_limit".into(),
            ));
        }
        if self.index.rrf_k == 0 {
            return Err(TwiderError::Config("index.rrf_k must be > 0".into()));
        }
        if self.api.max_limit == 0 || self.api.max_limit > MAX_SEARCH_LIMIT {
            return Err(TwiderError::Config(format!(
                "api.max_limit must be between 1 and {}",
                MAX_SEARCH_LIMIT
            )));
        }
        if self.api.default_limit == 0 || self.api.default_limit > self.api.max_limit {
            return Err(TwiderError::Config(
                "api.default_limit must be between 1 and api.max_limit".into(),
            ));
        }
        if self.stream.poison_policy == PoisonPolicy::DeadLetter
            && self.stream.dead_letter_subject.trim().is_empty()
        {
            return Err(TwiderError::Config(
                "stream.dead_letter_subject is required with poison_policy = \"dead_letter\""
                    .into(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// HTTP surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Page size when `limit` is omitted.
    pub default_limit: u64,
    /// Largest accepted page size (at most 100).
    pub max_limit: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            default_limit: DEFAULT_SEARCH_LIMIT,
            max_limit: MAX_SEARCH_LIMIT,
        }
    }
}

/// What the ingestion consumer does with a message that cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoisonPolicy {
    /// Fail the whole batch; it is redelivered until the message goes away.
    #[default]
    FailBatch,
    /// Route the undecodable message to the dead-letter subject and index the
    /// rest of the batch.
    DeadLetter,
}

/// Durable stream subscription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Whether the ingestion consumer runs in this process.
    pub enabled: bool,
    /// NATS server URL.
    pub url: String,
    /// JetStream stream name.
    pub stream_name: String,
    /// Subject filter for the durable consumer.
    pub subject: String,
    /// Durable consumer name.
    pub durable_name: String,
    /// Maximum messages per fetch.
    pub batch_size: usize,
    /// Bounded wait for a fetch, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Pause after a failed batch before fetching again, in milliseconds.
    pub backoff_ms: u64,
    /// Pause between fetch cycles, in milliseconds.
    pub poll_interval_ms: u64,
    /// Handling of undecodable messages.
    pub poison_policy: PoisonPolicy,
    /// Subject undecodable messages are republished to.
    pub dead_letter_subject: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "localhost:4222".to_string(),
            stream_name: "twider-stream".to_string(),
            subject: "post.created.*".to_string(),
            durable_name: "twider-durable-subscription".to_string(),
            batch_size: 10,
            fetch_timeout_ms: 1_000,
            backoff_ms: 5_000,
            poll_interval_ms: 100,
            poison_policy: PoisonPolicy::FailBatch,
            dead_letter_subject: "post.dead_letter".to_string(),
        }
    }
}

/// Which vector index implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// In-process index, lost on restart.
    Memory,
    /// Qdrant over gRPC.
    #[default]
    Qdrant,
}

/// Vector index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Qdrant gRPC URL.
    pub url: String,
    /// Collection holding post points.
    pub collection: String,
    /// Name of the dense vector space.
    pub dense_vector_name: String,
    /// Name of the sparse vector space.
    pub sparse_vector_name: String,
    /// Dimension of dense vectors; must match the dense model.
    pub dense_dim: usize,
    /// Each prefetch list holds `(offset + limit) * prefetch_factor` candidates.
    pub prefetch_factor: u64,
    /// Upper bound on each prefetch list; pages starting at or past it are empty.
    pub max_prefetch: u64,
    /// Reciprocal rank fusion smoothing constant.
    pub rrf_k: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Qdrant,
            url: "http://localhost:6334".to_string(),
            collection: "posts".to_string(),
            dense_vector_name: "dense".to_string(),
            sparse_vector_name: "sparse".to_string(),
            dense_dim: 384,
            prefetch_factor: 2,
            max_prefetch: 1000,
            rrf_k: 60,
        }
    }
}

/// Which embedding implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// ONNX Runtime models loaded from disk.
    #[default]
    Onnx,
    /// Deterministic hash vectors, for development without model files.
    Mock,
}

/// Embedding model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Directory with `model.onnx` + `tokenizer.json` for the dense model.
    pub dense_model_dir: String,
    /// Directory with `model.onnx` + `tokenizer.json` for the SPLADE model.
    pub sparse_model_dir: String,
    /// Dense model identifier, informational.
    pub dense_model_name: String,
    /// Sparse model identifier, informational.
    pub sparse_model_name: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Onnx,
            dense_model_dir: "models/all-MiniLM-L6-v2".to_string(),
            sparse_model_dir: "models/Splade_PP_en_v1".to_string(),
            dense_model_name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            sparse_model_name: "prithivida/Splade_PP_en_v1".to_string(),
        }
    }
}
