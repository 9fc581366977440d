use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::ai::{
    load_settings, update_settings, AiSettings, ClassifyOutcome, ClassifyRequest, ComposeRequest,
};

use super::auth::CurrentSession;
use super::error::{ApiError, ApiJson};
use super::state::AppState;

pub(super) async fn get_settings(
    State(state): State<AppState>,
    _session: CurrentSession,
) -> Result<Json<AiSettings>, ApiError> {
    let settings = load_settings(&state.store)
        .await
        .map_err(|err| ApiError::pipeline("ai/settings", err))?;
    Ok(Json(settings))
}

pub(super) async fn post_settings(
    State(state): State<AppState>,
    _session: CurrentSession,
    ApiJson(body): ApiJson<Value>,
) -> Result<Json<AiSettings>, ApiError> {
    let Value::Object(overrides) = body else {
        return Err(ApiError::BadRequest("settings must be a JSON object".to_string()));
    };
    let settings = update_settings(&state.store, overrides)
        .await
        .map_err(|err| ApiError::pipeline("ai/settings", err))?;
    Ok(Json(settings))
}

pub(super) async fn classify(
    State(state): State<AppState>,
    _session: CurrentSession,
    ApiJson(request): ApiJson<ClassifyRequest>,
) -> Result<Json<ClassifyOutcome>, ApiError> {
    let outcome = state
        .classifier
        .classify(&request)
        .await
        .map_err(|err| ApiError::pipeline("ai/classify", err))?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ThreadRequest {
    thread_id: String,
}

pub(super) async fn summarize(
    State(state): State<AppState>,
    _session: CurrentSession,
    ApiJson(request): ApiJson<ThreadRequest>,
) -> Result<Json<Value>, ApiError> {
    let summary = state
        .composer
        .summarize(&request.thread_id)
        .await
        .map_err(|err| ApiError::pipeline("ai/summarize", err))?;
    Ok(Json(json!({ "summary": summary })))
}

pub(super) async fn smart_replies(
    State(state): State<AppState>,
    _session: CurrentSession,
    ApiJson(request): ApiJson<ThreadRequest>,
) -> Result<Json<Value>, ApiError> {
    let replies = state
        .composer
        .smart_replies(&request.thread_id)
        .await
        .map_err(|err| ApiError::pipeline("ai/smart-replies", err))?;
    Ok(Json(json!({ "replies": replies })))
}

pub(super) async fn compose(
    State(state): State<AppState>,
    _session: CurrentSession,
    ApiJson(request): ApiJson<ComposeRequest>,
) -> Result<Json<Value>, ApiError> {
    let draft = state
        .composer
        .compose(&request)
        .await
        .map_err(|err| ApiError::pipeline("ai/compose", err))?;
    Ok(Json(json!({ "draft": draft })))
}
