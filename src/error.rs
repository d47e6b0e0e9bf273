use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Rejected before any backend work: empty prompt or non-positive token budget.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Model load, inference or decode failure. Never retried.
    #[error("backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl GenerationError {
    pub fn status(&self) -> StatusCode {
        match self {
            GenerationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GenerationError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GenerationError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
