use axum::{Json, extract::State};
use std::sync::Arc;

use crate::api::models::{GenerateResponse, GenerationRequest, HealthResponse};
use crate::app_state::AppState;
use crate::service;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.model_id.clone(),
        device: state.device_kind().as_str().to_string(),
    })
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerationRequest>,
) -> Json<GenerateResponse> {
    let result = service::generate(state, payload).await;

    match &result {
        Ok(generation) => tracing::info!(
            generated_chars = generation.generated_text.chars().count(),
            "generation completed"
        ),
        Err(err) => tracing::warn!(error = %err, "generation rejected"),
    }

    Json(GenerateResponse::from(result))
}
