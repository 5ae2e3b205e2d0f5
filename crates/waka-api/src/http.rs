use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use waka_core::{ExecutionCoordinator, TokenAuthenticator};
use waka_model::{EXEC_PATH, EXEC_STREAM_PATH, HEALTH_PATH, RunState};

use crate::{auth, error::ApiError, ws};

/// Shared handles every route needs.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: ExecutionCoordinator,
    pub auth: Arc<TokenAuthenticator>,
}

impl ApiState {
    pub fn new(coordinator: ExecutionCoordinator, auth: Arc<TokenAuthenticator>) -> Self {
        Self { coordinator, auth }
    }
}

/// HTTP API service builder.
pub struct HttpApi {
    state: ApiState,
}

impl HttpApi {
    pub fn new(state: ApiState) -> Self {
        Self { state }
    }

    /// Build axum router with mounted endpoints.
    ///
    /// The token gate wraps the whole router, so unknown paths are rejected
    /// the same way as known ones.
    pub fn router(self) -> Router {
        Router::new()
            .route(EXEC_PATH, post(submit_command))
            .route(EXEC_STREAM_PATH, get(ws::stream_output))
            .route(HEALTH_PATH, get(health))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::require_token,
            ))
            .with_state(self.state)
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HealthResponse {
    pub status: String,
    pub execution: RunState,
    pub subscribers: usize,
    pub observers: usize,
    pub history: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /exec
///
/// Body is the raw command text.
async fn submit_command(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let command = std::str::from_utf8(&body)
        .map_err(|_| ApiError::InvalidRequest("command must be valid UTF-8".into()))?;

    state.coordinator.execute(command)?;
    debug!(bytes = body.len(), "command accepted");
    Ok(StatusCode::ACCEPTED)
}

/// GET /health
async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let c = &state.coordinator;
    Json(HealthResponse {
        status: "UP".to_string(),
        execution: c.state(),
        subscribers: c.logs().subscriber_count(),
        observers: c.completion().observer_count(),
        history: c.logs().history_len(),
    })
}
