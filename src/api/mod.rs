use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::service::GenerationService;

pub mod handlers;
pub mod types;

use handlers::{generate_handler, health_handler};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GenerationService>,
}

/// Public router: `POST /generate` and `GET /health`, with CORS open to every origin.
pub fn router(service: Arc<GenerationService>) -> Router {
    Router::new()
        .route("/generate", post(generate_handler))
        .route("/health", get(health_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(AppState { service })
}
