use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::models::{
    ClassificationRule, KnowledgeCategory, KnowledgeEntry, KnowledgePatch, Label, LabelPatch,
    RulePatch,
};
use crate::store::{with_store, NewKnowledgeEntry, NewLabel};

use super::auth::CurrentSession;
use super::error::{ApiError, ApiJson};
use super::state::AppState;

const DEFAULT_LABEL_COLOR: &str = "#6b7280";

fn required(value: &str, field: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

pub(super) async fn list_labels(
    State(state): State<AppState>,
    _session: CurrentSession,
) -> Result<Json<Vec<Label>>, ApiError> {
    Ok(Json(with_store(&state.store, |store| store.list_labels()).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateLabel {
    name: String,
    color: Option<String>,
    sort_order: Option<i32>,
    #[serde(default = "default_true")]
    auto_classify: bool,
}

fn default_true() -> bool {
    true
}

pub(super) async fn create_label(
    State(state): State<AppState>,
    _session: CurrentSession,
    ApiJson(request): ApiJson<CreateLabel>,
) -> Result<impl IntoResponse, ApiError> {
    let new_label = NewLabel {
        name: required(&request.name, "name")?,
        color: request
            .color
            .filter(|color| !color.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LABEL_COLOR.to_string()),
        sort_order: request.sort_order.unwrap_or(0),
        auto_classify: request.auto_classify,
    };
    let label = with_store(&state.store, move |store| store.create_label(new_label)).await?;
    info!("label {} created", label.name);
    Ok((StatusCode::CREATED, Json(label)))
}

pub(super) async fn update_label(
    State(state): State<AppState>,
    _session: CurrentSession,
    Path(label_id): Path<String>,
    ApiJson(patch): ApiJson<LabelPatch>,
) -> Result<Json<Label>, ApiError> {
    if let Some(name) = patch.name.as_deref() {
        required(name, "name")?;
    }
    let label = with_store(&state.store, move |store| store.update_label(&label_id, &patch))
        .await?
        .ok_or_else(|| ApiError::not_found("Label"))?;
    Ok(Json(label))
}

pub(super) async fn delete_label(
    State(state): State<AppState>,
    _session: CurrentSession,
    Path(label_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if with_store(&state.store, move |store| store.delete_label(&label_id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Label"))
    }
}

pub(super) async fn list_rules(
    State(state): State<AppState>,
    _session: CurrentSession,
) -> Result<Json<Vec<ClassificationRule>>, ApiError> {
    Ok(Json(with_store(&state.store, |store| store.list_rules()).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateRule {
    label_id: String,
    criteria: String,
    #[serde(default = "default_true")]
    is_active: bool,
}

/// Creating an active rule retires the label's previous active rule.
pub(super) async fn create_rule(
    State(state): State<AppState>,
    _session: CurrentSession,
    ApiJson(request): ApiJson<CreateRule>,
) -> Result<impl IntoResponse, ApiError> {
    let criteria = required(&request.criteria, "criteria")?;
    let rule = with_store(&state.store, move |store| {
        if store.get_label(&request.label_id)?.is_none() {
            return Ok(None);
        }
        store
            .create_rule(&request.label_id, &criteria, request.is_active)
            .map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::not_found("Label"))?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub(super) async fn update_rule(
    State(state): State<AppState>,
    _session: CurrentSession,
    Path(rule_id): Path<String>,
    ApiJson(patch): ApiJson<RulePatch>,
) -> Result<Json<ClassificationRule>, ApiError> {
    if let Some(criteria) = patch.criteria.as_deref() {
        required(criteria, "criteria")?;
    }
    let rule = with_store(&state.store, move |store| store.update_rule(&rule_id, &patch))
        .await?
        .ok_or_else(|| ApiError::not_found("Rule"))?;
    Ok(Json(rule))
}

pub(super) async fn delete_rule(
    State(state): State<AppState>,
    _session: CurrentSession,
    Path(rule_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if with_store(&state.store, move |store| store.delete_rule(&rule_id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Rule"))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct KnowledgeParams {
    #[serde(default)]
    active_only: bool,
}

pub(super) async fn list_knowledge(
    State(state): State<AppState>,
    _session: CurrentSession,
    Query(params): Query<KnowledgeParams>,
) -> Result<Json<Vec<KnowledgeEntry>>, ApiError> {
    let active_only = params.active_only;
    Ok(Json(
        with_store(&state.store, move |store| store.list_knowledge(active_only)).await?,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateKnowledge {
    category: KnowledgeCategory,
    title: String,
    content: String,
    #[serde(default = "default_true")]
    is_active: bool,
    #[serde(default = "default_true")]
    is_editable: bool,
}

pub(super) async fn create_knowledge(
    State(state): State<AppState>,
    _session: CurrentSession,
    ApiJson(request): ApiJson<CreateKnowledge>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = NewKnowledgeEntry {
        category: request.category,
        title: required(&request.title, "title")?,
        content: required(&request.content, "content")?,
        is_active: request.is_active,
        is_editable: request.is_editable,
    };
    let entry = with_store(&state.store, move |store| store.create_knowledge(entry)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn editable_entry(state: &AppState, entry_id: &str) -> Result<KnowledgeEntry, ApiError> {
    let id = entry_id.to_string();
    let entry = with_store(&state.store, move |store| store.get_knowledge(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("Knowledge entry"))?;
    if !entry.is_editable {
        return Err(ApiError::Forbidden(
            "This knowledge entry cannot be modified".to_string(),
        ));
    }
    Ok(entry)
}

pub(super) async fn update_knowledge(
    State(state): State<AppState>,
    _session: CurrentSession,
    Path(entry_id): Path<String>,
    ApiJson(patch): ApiJson<KnowledgePatch>,
) -> Result<Json<KnowledgeEntry>, ApiError> {
    editable_entry(&state, &entry_id).await?;
    let entry = with_store(&state.store, move |store| store.update_knowledge(&entry_id, &patch))
        .await?
        .ok_or_else(|| ApiError::not_found("Knowledge entry"))?;
    Ok(Json(entry))
}

pub(super) async fn delete_knowledge(
    State(state): State<AppState>,
    _session: CurrentSession,
    Path(entry_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    editable_entry(&state, &entry_id).await?;
    if with_store(&state.store, move |store| store.delete_knowledge(&entry_id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Knowledge entry"))
    }
}
