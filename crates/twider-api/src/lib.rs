//! Twider API crate - axum HTTP server and route handlers for hybrid search.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server, API_PREFIX};
pub use state::AppState;
