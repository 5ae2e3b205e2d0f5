use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;
use waka_model::TOKEN_HEADER;

use crate::{error::ApiError, http::ApiState};

/// Reject any request whose token header is missing or wrong, before routing.
pub(crate) async fn require_token(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let candidate = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    if !state.auth.validate_token(candidate) {
        warn!(
            method = %req.method(),
            path = %req.uri().path(),
            token_present = candidate.is_some(),
            "rejected unauthenticated request"
        );
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}
