//! Route handler functions.
//!
//! Search parameters are validated before any dependency is called.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use twider_core::types::{RetrievedPost, SearchQuery};

use crate::error::ApiError;
use crate::state::AppState;

/// Service name reported by the health endpoint.
pub const SERVICE_NAME: &str = "twider-search";

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchHitResponse {
    pub id: Uuid,
    pub content: String,
    pub media_urls: Vec<String>,
}

impl From<RetrievedPost> for SearchHitResponse {
    fn from(post: RetrievedPost) -> Self {
        Self {
            id: post.id,
            content: post.payload.content,
            media_urls: post.payload.media_urls,
        }
    }
}

/// One page of search results.
///
/// `total` is the number of results in this page, not the full match count.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHitResponse>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /search?q=&offset=&limit= - hybrid search over indexed posts.
pub async fn search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let q = params
        .q
        .ok_or_else(|| ApiError::BadRequest("Parameter 'q' is required for search".to_string()))?;
    let offset = params.offset.unwrap_or(0);
    let limit = params
        .limit
        .unwrap_or(state.config.default_limit as i64);

    let query = SearchQuery::with_max_limit(q, offset, limit, state.config.max_limit)?;

    let posts = state.searcher.search_posts(&query).await?;

    debug!(
        q = %query.text,
        offset = query.offset,
        limit = query.limit,
        returned = posts.len(),
        "Search served"
    );

    let results: Vec<SearchHitResponse> = posts.into_iter().map(SearchHitResponse::from).collect();
    Ok(Json(SearchResponse {
        total: results.len() as u64,
        results,
        offset: query.offset,
        limit: query.limit,
    }))
}

/// GET /health - static liveness, no dependency probing.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET / - running banner.
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Twider search service is running".to_string(),
    })
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::NotFound("No such route".to_string())
}
