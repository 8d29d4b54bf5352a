//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use twider_core::config::ApiConfig;
use twider_vector::search::HybridSearcher;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks. Nothing here
/// is mutated after startup.
#[derive(Clone)]
pub struct AppState {
    /// HTTP surface configuration (page size defaults and ceiling).
    pub config: Arc<ApiConfig>,
    /// Hybrid query engine.
    pub searcher: Arc<HybridSearcher>,
    /// Server start time for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: ApiConfig, searcher: HybridSearcher) -> Self {
        Self {
            config: Arc::new(config),
            searcher: Arc::new(searcher),
            start_time: Instant::now(),
        }
    }
}
