//! HTTP API
//!
//! Thin transport over [`InferenceEngine`]: maps error kinds to status codes
//! and nothing else.

use crate::features::FeatureVector;
use crate::inference::{HealthResponse, InferenceEngine, InferenceStats, PredictResponse};
use crate::{ErrorKind, ServeError};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Prediction request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    /// `[[sepal_length, sepal_width, petal_length, petal_width], ...]`
    pub instances: Vec<FeatureVector>,
}

/// Error body, `{"detail": "..."}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable reason
    pub detail: String,
}

/// Error with its HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl From<ServeError> for ApiError {
    fn from(err: ServeError) -> Self {
        let status = match err.kind() {
            ErrorKind::Client => StatusCode::BAD_REQUEST,
            ErrorKind::Server => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { detail: self.detail })).into_response()
    }
}

/// Build the API router
pub fn build_router(engine: Arc<InferenceEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/stats", get(stats))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn health(State(engine): State<Arc<InferenceEngine>>) -> Json<HealthResponse> {
    Json(engine.health())
}

async fn stats(State(engine): State<Arc<InferenceEngine>>) -> Json<InferenceStats> {
    Json(engine.stats())
}

async fn predict(
    State(engine): State<Arc<InferenceEngine>>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    // The log append is blocking file I/O
    let result = tokio::task::spawn_blocking(move || engine.predict(&request.instances))
        .await
        .map_err(|e| ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: format!("prediction task failed: {e}"),
        })?;

    Ok(Json(result?))
}
