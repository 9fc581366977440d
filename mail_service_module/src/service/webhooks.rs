use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tracing::warn;

use super::error::ApiError;
use super::inbound::{process_inbound, InboundOutcome, PostmarkInbound};
use super::state::AppState;
use super::verify::verify_inbound;

/// POST /api/webhooks/inbound: signed provider callback, no session.
pub(super) async fn inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InboundOutcome>, ApiError> {
    if let Err(reason) = verify_inbound(
        &headers,
        &body,
        state.config.webhook_secret.as_deref(),
        state.config.is_production(),
    ) {
        warn!("inbound webhook rejected: {}", reason);
        return Err(ApiError::Unauthorized);
    }
    let payload: PostmarkInbound = serde_json::from_slice(&body)
        .map_err(|err| ApiError::BadRequest(format!("invalid inbound payload: {err}")))?;
    Ok(Json(process_inbound(&state, payload).await?))
}
