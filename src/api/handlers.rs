use axum::{extract::State, Json};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    api::{
        types::{GenerateRequest, GenerateResponse, HealthResponse},
        AppState,
    },
    error::GenerationError,
    service::GenerationRequest,
};

pub async fn generate_handler(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, GenerationError> {
    let max_tokens = req
        .max_tokens
        .unwrap_or_else(|| state.service.options().default_max_tokens as i64);

    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("generate", %request_id);

    let out = state
        .service
        .generate(GenerationRequest::new(req.prompt, max_tokens))
        .instrument(span)
        .await?;

    Ok(Json(GenerateResponse { response: out.text }))
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        model: state.service.model_name().to_string(),
        cleaner: state.service.cleaner_name().to_string(),
    })
}
