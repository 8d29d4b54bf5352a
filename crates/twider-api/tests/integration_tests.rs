//! Integration tests for the Twider search API.
//!
//! Each test builds its own router over an in-memory index and mock
//! embeddings; posts reach the index through the real ingestion consumer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use twider_api::create_router;
use twider_api::error::ErrorBody;
use twider_api::handlers::{HealthResponse, RootResponse, SearchResponse};
use twider_api::state::AppState;
use twider_core::config::{ApiConfig, PoisonPolicy};
use twider_core::error::{Result, TwiderError};
use twider_core::types::{IndexPoint, RetrievedPost, ScoredId, Vector, VectorSpace};
use twider_ingest::{ConsumerSettings, CycleOutcome, IngestionConsumer, MemoryStream};
use twider_vector::embedding::{
    DynEmbeddingService, EmbeddingService, MockEmbedding, DEFAULT_DENSE_DIMENSIONS,
};
use twider_vector::index::{CollectionSchema, IndexClient, MemoryIndex};
use twider_vector::pipeline::IndexingPipeline;
use twider_vector::search::HybridSearcher;

// =============================================================================
// Helpers
// =============================================================================

struct Fixture {
    index: Arc<MemoryIndex>,
    embedder: Arc<dyn DynEmbeddingService>,
    stream: MemoryStream,
}

impl Fixture {
    fn new() -> Self {
        Self {
            index: Arc::new(MemoryIndex::new()),
            embedder: Arc::new(MockEmbedding::new()),
            stream: MemoryStream::new(),
        }
    }

    /// Publish posts and run one consumer cycle so they land in the index.
    async fn ingest(&self, posts: &[(Uuid, &str)]) {
        for (id, content) in posts {
            let payload = serde_json::json!({
                "Id": id,
                "Content": content,
                "MediaUrls": [Uuid::from_u128(7)],
            })
            .to_string();
            self.stream.publish("post.created.api", payload).unwrap();
        }

        let pipeline = IndexingPipeline::new(
            self.index.clone(),
            self.embedder.clone(),
            PoisonPolicy::FailBatch,
        );
        let consumer = IngestionConsumer::new(
            self.stream.clone(),
            pipeline,
            ConsumerSettings {
                batch_size: 100,
                fetch_timeout: Duration::from_millis(20),
                backoff: Duration::from_millis(20),
                poll_interval: Duration::from_millis(5),
            },
        );
        let outcome = consumer.poll_once().await;
        assert!(
            matches!(outcome, CycleOutcome::Committed { acked, .. } if acked == posts.len()),
            "unexpected outcome: {:?}",
            outcome
        );
    }

    fn app(&self) -> axum::Router {
        let searcher = HybridSearcher::new(self.index.clone(), self.embedder.clone());
        create_router(AppState::new(ApiConfig::default(), searcher))
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn search(app: axum::Router, uri: &str) -> SearchResponse {
    let response = app.oneshot(get(uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    serde_json::from_value(body_json(response).await).unwrap()
}

async fn expect_bad_request(app: axum::Router, uri: &str) {
    let response = app.oneshot(get(uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri: {}", uri);
    let body: ErrorBody = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.error, "bad_request");
}

/// Embedder whose model server is down.
struct UnavailableEmbedding;

impl EmbeddingService for UnavailableEmbedding {
    async fn embed(&self, _text: &str, _space: VectorSpace) -> Result<Vector> {
        Err(TwiderError::Embedding("model server unreachable".into()))
    }

    fn dense_dimensions(&self) -> usize {
        DEFAULT_DENSE_DIMENSIONS
    }
}

/// Index whose queries always fail.
#[derive(Default)]
struct UnavailableIndex;

#[async_trait]
impl IndexClient for UnavailableIndex {
    async fn ensure_collection(&self, _schema: &CollectionSchema) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, _points: Vec<IndexPoint>) -> Result<()> {
        Err(TwiderError::Index("connection refused".into()))
    }

    async fn query(&self, _vector: &Vector, _limit: u64) -> Result<Vec<ScoredId>> {
        Err(TwiderError::Index("connection refused".into()))
    }

    async fn retrieve(&self, _ids: &[Uuid]) -> Result<Vec<RetrievedPost>> {
        Err(TwiderError::Index("connection refused".into()))
    }

    async fn count(&self) -> Result<u64> {
        Err(TwiderError::Index("connection refused".into()))
    }
}

// =============================================================================
// Search
// =============================================================================

#[tokio::test]
async fn test_ingested_post_is_searchable() {
    let fixture = Fixture::new();
    let id = Uuid::from_u128(1);
    fixture.ingest(&[(id, "hello world")]).await;

    let page = search(fixture.app(), "/search?q=hello").await;

    assert_eq!(page.total, 1);
    assert_eq!(page.offset, 0);
    assert_eq!(page.limit, 15);
    assert_eq!(page.results[0].id, id);
    assert_eq!(page.results[0].content, "hello world");
    assert_eq!(
        page.results[0].media_urls,
        vec![Uuid::from_u128(7).to_string()]
    );
}

#[tokio::test]
async fn test_lexical_match_ranks_first() {
    let fixture = Fixture::new();
    let target = Uuid::from_u128(3);
    fixture
        .ingest(&[
            (Uuid::from_u128(1), "rust async runtime"),
            (Uuid::from_u128(2), "gardening tips for spring"),
            (target, "hello world"),
            (Uuid::from_u128(4), "weekend hiking trip"),
        ])
        .await;

    let page = search(fixture.app(), "/search?q=hello&limit=4").await;

    assert_eq!(page.total, 4);
    assert_eq!(page.results[0].id, target);
}

#[tokio::test]
async fn test_response_shape() {
    let fixture = Fixture::new();
    fixture.ingest(&[(Uuid::from_u128(1), "hello world")]).await;

    let response = fixture
        .app()
        .oneshot(get("/search?q=hello&offset=0&limit=5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    assert!(json["results"].is_array());
    assert_eq!(json["total"], 1);
    assert_eq!(json["offset"], 0);
    assert_eq!(json["limit"], 5);
    let hit = &json["results"][0];
    assert!(hit["id"].is_string());
    assert!(hit["content"].is_string());
    assert!(hit["media_urls"].is_array());
}

#[tokio::test]
async fn test_total_counts_returned_page_only() {
    let fixture = Fixture::new();
    let posts: Vec<(Uuid, String)> = (1..=5)
        .map(|i| (Uuid::from_u128(i), format!("post number {}", i)))
        .collect();
    let borrowed: Vec<(Uuid, &str)> = posts.iter().map(|(id, c)| (*id, c.as_str())).collect();
    fixture.ingest(&borrowed).await;

    let page = search(fixture.app(), "/search?q=post&limit=2").await;

    assert_eq!(page.results.len(), 2);
    assert_eq!(page.total, 2);
    assert_ne!(page.results[0].id, page.results[1].id);
}

#[tokio::test]
async fn test_page_beyond_results_is_empty() {
    let fixture = Fixture::new();
    fixture
        .ingest(&[
            (Uuid::from_u128(1), "first post"),
            (Uuid::from_u128(2), "second post"),
            (Uuid::from_u128(3), "third post"),
        ])
        .await;

    let page = search(fixture.app(), "/search?q=post&offset=10&limit=5").await;

    assert!(page.results.is_empty());
    assert_eq!(page.total, 0);
    assert_eq!(page.offset, 10);
    assert_eq!(page.limit, 5);
}

#[tokio::test]
async fn test_empty_index_returns_empty_page() {
    let fixture = Fixture::new();
    let page = search(fixture.app(), "/search?q=anything").await;
    assert!(page.results.is_empty());
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_empty_query_text_is_permitted() {
    let fixture = Fixture::new();
    fixture
        .ingest(&[
            (Uuid::from_u128(1), "first post"),
            (Uuid::from_u128(2), "second post"),
        ])
        .await;

    let page = search(fixture.app(), "/search?q=&limit=1").await;

    assert!(page.results.len() <= 1);
    assert_eq!(page.total, page.results.len() as u64);
    assert_eq!(page.limit, 1);
}

#[tokio::test]
async fn test_reingested_post_is_not_duplicated() {
    let fixture = Fixture::new();
    let id = Uuid::from_u128(9);
    fixture.ingest(&[(id, "hello world")]).await;
    fixture.ingest(&[(id, "hello world")]).await;

    let page = search(fixture.app(), "/search?q=hello").await;

    assert_eq!(page.total, 1);
    assert_eq!(page.results[0].id, id);
}

#[tokio::test]
async fn test_limit_bounds_accepted() {
    let fixture = Fixture::new();
    fixture.ingest(&[(Uuid::from_u128(1), "hello world")]).await;

    let low = search(fixture.app(), "/search?q=hello&limit=1").await;
    assert_eq!(low.limit, 1);
    let high = search(fixture.app(), "/search?q=hello&limit=100").await;
    assert_eq!(high.limit, 100);
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_limit_zero_rejected() {
    expect_bad_request(Fixture::new().app(), "/search?q=hello&limit=0").await;
}

#[tokio::test]
async fn test_limit_above_max_rejected() {
    expect_bad_request(Fixture::new().app(), "/search?q=hello&limit=101").await;
}

#[tokio::test]
async fn test_negative_offset_rejected() {
    expect_bad_request(Fixture::new().app(), "/search?q=hello&offset=-1").await;
}

#[tokio::test]
async fn test_missing_query_rejected() {
    expect_bad_request(Fixture::new().app(), "/search").await;
}

#[tokio::test]
async fn test_non_numeric_limit_rejected() {
    expect_bad_request(Fixture::new().app(), "/search?q=hello&limit=ten").await;
}

#[tokio::test]
async fn test_validation_precedes_dependencies() {
    let searcher = HybridSearcher::new(
        Arc::new(UnavailableIndex),
        Arc::new(MockEmbedding::new()),
    );
    let app = create_router(AppState::new(ApiConfig::default(), searcher));
    expect_bad_request(app, "/search?q=hello&limit=0").await;
}

#[tokio::test]
async fn test_configured_max_limit_enforced() {
    let fixture = Fixture::new();
    let config = ApiConfig {
        max_limit: 20,
        ..ApiConfig::default()
    };
    let searcher = HybridSearcher::new(fixture.index.clone(), fixture.embedder.clone());
    let app = create_router(AppState::new(config, searcher));
    expect_bad_request(app, "/search?q=hello&limit=21").await;
}

// =============================================================================
// Dependency failures
// =============================================================================

#[tokio::test]
async fn test_index_failure_returns_bad_gateway() {
    let searcher = HybridSearcher::new(
        Arc::new(UnavailableIndex),
        Arc::new(MockEmbedding::new()),
    );
    let app = create_router(AppState::new(ApiConfig::default(), searcher));

    let response = app.oneshot(get("/search?q=hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: ErrorBody = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.error, "dependency_failure");
    assert!(body.message.contains("connection refused"));
}

#[tokio::test]
async fn test_embedding_failure_returns_bad_gateway() {
    let fixture = Fixture::new();
    fixture.ingest(&[(Uuid::new_v4(), "hello world")]).await;
    let searcher = HybridSearcher::new(fixture.index.clone(), Arc::new(UnavailableEmbedding));
    let app = create_router(AppState::new(ApiConfig::default(), searcher));

    let response = app.oneshot(get("/search?q=hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: ErrorBody = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.error, "dependency_failure");
    assert!(body.message.contains("model server unreachable"));
}

// =============================================================================
// Health, root and routing
// =============================================================================

#[tokio::test]
async fn test_health() {
    let response = Fixture::new().app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.service, "twider-search");
    assert!(!health.version.is_empty());
}

#[tokio::test]
async fn test_health_ignores_dependency_state() {
    let searcher = HybridSearcher::new(
        Arc::new(UnavailableIndex),
        Arc::new(MockEmbedding::new()),
    );
    let app = create_router(AppState::new(ApiConfig::default(), searcher));
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_root() {
    let response = Fixture::new().app().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let root: RootResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert!(root.message.contains("running"));
}

#[tokio::test]
async fn test_api_prefix_routes() {
    let fixture = Fixture::new();
    let id = Uuid::from_u128(5);
    fixture.ingest(&[(id, "hello world")]).await;

    let page = search(fixture.app(), "/api/v1/search?q=hello").await;
    assert_eq!(page.results[0].id, id);

    let response = fixture.app().oneshot(get("/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_returns_not_found() {
    let response = Fixture::new()
        .app()
        .oneshot(get("/does-not-exist"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: ErrorBody = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.error, "not_found");
}
