//! # Gateway HTTP surface
//!
//! OpenAI-compatible endpoints plus the worker transport upgrade.
//!
//! ## Endpoints
//!
//! - `POST /v1/chat/completions` - Chat completion (streaming and non-streaming)
//! - `GET /v1/models`, `GET /v1/models/:model` - Models advertised by the fleet
//! - `GET /api/nodes` - Read-only view of connected workers
//! - `GET /ws` - Worker transport upgrade (requires `Client-Token`)
//!
//! ## Error Handling
//!
//! All errors are returned in OpenAI-compatible format:
//! ```json
//! {
//!   "error": {
//!     "message": "Model pro-model not allowed for this API key",
//!     "type": "invalid_request_error",
//!     "code": "model_not_allowed"
//!   }
//! }
//! ```

mod completions;
mod models;
mod nodes;
pub mod types;
mod ws;

pub use types::*;

use crate::auth::KeyStore;
use crate::hub::Hub;
use crate::limiter::RateLimiter;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Maximum request body size (10 MB).
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub keys: Arc<dyn KeyStore>,
    pub limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    pub fn new(hub: Arc<Hub>, keys: Arc<dyn KeyStore>, limiter: Arc<dyn RateLimiter>) -> Self {
        Self { hub, keys, limiter }
    }
}

/// Create the main router with all endpoints configured.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(completions::handle))
        .route("/v1/models", get(models::list))
        .route("/v1/models/:model", get(models::get_one))
        .route("/api/nodes", get(nodes::handle))
        .route("/ws", get(ws::handle))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .with_state(state)
}
