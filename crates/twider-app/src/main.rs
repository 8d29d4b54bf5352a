//! Twider application binary - composition root.
//!
//! 1. Load configuration from TOML and initialise tracing
//! 2. Build the embedding service and the vector index client
//! 3. Make sure the collection exists (fatal if it cannot be provisioned)
//! 4. Start the ingestion consumer on the post stream
//! 5. Serve the search API until Ctrl-C, then drain the consumer

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use twider_api::state::AppState;
use twider_core::config::{EmbeddingBackend, IndexBackend, TwiderConfig};
use twider_core::error::{Result, TwiderError};
use twider_core::types::SearchQuery;
use twider_ingest::{ConsumerSettings, IngestionConsumer, NatsTransport};
use twider_vector::embedding::{DynEmbeddingService, MockEmbedding, OnnxEmbeddingService};
use twider_vector::index::{CollectionSchema, IndexClient, MemoryIndex};
use twider_vector::pipeline::IndexingPipeline;
use twider_vector::qdrant::QdrantIndex;
use twider_vector::search::HybridSearcher;

use cli::{CliArgs, Command};

/// Load the config file if present; a present but invalid file is an error.
fn load_config(path: &Path) -> Result<TwiderConfig> {
    if path.exists() {
        TwiderConfig::load(path)
    } else {
        let config = TwiderConfig::default();
        config.validate()?;
        Ok(config)
    }
}

fn build_embedder(config: &TwiderConfig) -> Result<Arc<dyn DynEmbeddingService>> {
    match config.embedding.backend {
        EmbeddingBackend::Onnx => {
            tracing::info!(
                dense = %config.embedding.dense_model_name,
                sparse = %config.embedding.sparse_model_name,
                "Loading ONNX embedding models"
            );
            let service = OnnxEmbeddingService::from_directories(
                Path::new(&config.embedding.dense_model_dir),
                Path::new(&config.embedding.sparse_model_dir),
            )?;
            Ok(Arc::new(service))
        }
        EmbeddingBackend::Mock => {
            tracing::warn!("Using mock embeddings; rankings are not semantic");
            Ok(Arc::new(MockEmbedding::with_dimensions(
                config.index.dense_dim,
            )))
        }
    }
}

fn build_index(config: &TwiderConfig) -> Result<Arc<dyn IndexClient>> {
    match config.index.backend {
        IndexBackend::Qdrant => Ok(Arc::new(QdrantIndex::connect(&config.index)?)),
        IndexBackend::Memory => {
            tracing::warn!("Using in-memory index; posts are lost on exit");
            Ok(Arc::new(MemoryIndex::new()))
        }
    }
}

/// Provision the collection, checking the embedder agrees on the dense width.
async fn ensure_collection(
    config: &TwiderConfig,
    index: &dyn IndexClient,
    embedder: &dyn DynEmbeddingService,
) -> Result<()> {
    let schema = CollectionSchema::from_config(&config.index);
    if embedder.dense_dimensions() != schema.dense_dim {
        return Err(TwiderError::Config(format!(
            "embedding model produces {} dimensions but index.dense_dim is {}",
            embedder.dense_dimensions(),
            schema.dense_dim
        )));
    }
    index.ensure_collection(&schema).await?;
    tracing::info!(collection = %schema.name, dense_dim = schema.dense_dim, "Collection ready");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}

async fn serve(
    config: TwiderConfig,
    index: Arc<dyn IndexClient>,
    embedder: Arc<dyn DynEmbeddingService>,
) -> Result<()> {
    let consumer = if config.stream.enabled {
        let transport = NatsTransport::connect(&config.stream).await?;
        let pipeline = IndexingPipeline::new(
            Arc::clone(&index),
            Arc::clone(&embedder),
            config.stream.poison_policy,
        );
        let consumer = IngestionConsumer::new(
            transport,
            pipeline,
            ConsumerSettings::from_config(&config.stream),
        );
        let handle = consumer.handle();
        tracing::info!(
            stream = %config.stream.stream_name,
            subject = %config.stream.subject,
            durable = %config.stream.durable_name,
            "Ingestion consumer starting"
        );
        Some((handle, tokio::spawn(consumer.run())))
    } else {
        tracing::info!("Stream consumption disabled in config");
        None
    };

    let searcher = HybridSearcher::from_config(index, embedder, &config.index);
    let state = AppState::new(config.api.clone(), searcher);
    let served = twider_api::start_server(&config.api, state, shutdown_signal()).await;

    if let Some((handle, task)) = consumer {
        handle.stop();
        match task.await {
            Ok(Ok(stats)) => tracing::info!(acked = stats.acked, "Ingestion consumer drained"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Ingestion consumer closed with error"),
            Err(e) => tracing::error!(error = %e, "Ingestion consumer task panicked"),
        }
    }

    served
}

async fn search_once(
    config: &TwiderConfig,
    index: Arc<dyn IndexClient>,
    embedder: Arc<dyn DynEmbeddingService>,
    query: String,
    offset: i64,
    limit: i64,
) -> Result<()> {
    let query = SearchQuery::with_max_limit(query, offset, limit, config.api.max_limit)?;
    let searcher = HybridSearcher::from_config(index, embedder, &config.index);
    let posts = searcher.search_posts(&query).await?;
    println!("{}", serde_json::to_string_pretty(&posts)?);
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = load_config(&config_file)?;
    config.api.port = args.resolve_port(config.api.port);
    config.general.log_level = args.resolve_log_level(&config.general.log_level);
    config.stream.url = args.resolve_stream_url(&config.stream.url);
    config.index.url = args.resolve_index_url(&config.index.url);

    // Tracing: RUST_LOG wins over the resolved level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Twider v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    let embedder = build_embedder(&config)?;
    let index = build_index(&config)?;

    if let Err(e) = ensure_collection(&config, index.as_ref(), embedder.as_ref()).await {
        tracing::error!(error = %e, "Collection check failed");
        return Err(e.into());
    }

    match args.command() {
        Command::InitCollection => {}
        Command::Serve => serve(config, index, embedder).await?,
        Command::Search {
            query,
            offset,
            limit,
        } => search_once(&config, index, embedder, query, offset, limit).await?,
    }

    Ok(())
}
