use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{
    Email, EmailOrder, LabelApplication, Mailbox, Thread, ThreadFlagsPatch, ThreadLabel,
    ThreadQuery, ThreadView,
};
use crate::notifications::BusEvent;
use crate::store::with_store;

use super::auth::CurrentSession;
use super::error::{ApiError, ApiJson};
use super::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

pub(super) async fn list_mailboxes(
    State(state): State<AppState>,
    _session: CurrentSession,
) -> Result<Json<Vec<Mailbox>>, ApiError> {
    let mailboxes = with_store(&state.store, |store| store.list_mailboxes()).await?;
    Ok(Json(mailboxes))
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateMailbox {
    address: String,
    #[serde(default)]
    name: String,
}

pub(super) async fn create_mailbox(
    State(state): State<AppState>,
    _session: CurrentSession,
    ApiJson(request): ApiJson<CreateMailbox>,
) -> Result<impl IntoResponse, ApiError> {
    let address = request.address.trim().to_string();
    if !address.contains('@') {
        return Err(ApiError::BadRequest("address must be an email address".to_string()));
    }
    let name = match request.name.trim() {
        "" => address.clone(),
        name => name.to_string(),
    };
    let mailbox =
        with_store(&state.store, move |store| store.create_mailbox(&address, &name)).await?;
    info!("mailbox {} registered", mailbox.address);
    Ok((StatusCode::CREATED, Json(mailbox)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ThreadListParams {
    mailbox_id: Option<String>,
    view: Option<ThreadView>,
    label_id: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

pub(super) async fn list_threads(
    State(state): State<AppState>,
    _session: CurrentSession,
    Query(params): Query<ThreadListParams>,
) -> Result<Json<Vec<Thread>>, ApiError> {
    let query = ThreadQuery {
        mailbox_id: params.mailbox_id.filter(|id| !id.is_empty()),
        view: params.view.unwrap_or_default(),
        label_id: params.label_id.filter(|id| !id.is_empty()),
        limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        offset: params.offset.unwrap_or(0),
    };
    let threads = with_store(&state.store, move |store| store.list_threads(&query)).await?;
    Ok(Json(threads))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ThreadDetail {
    #[serde(flatten)]
    thread: Thread,
    emails: Vec<Email>,
    labels: Vec<ThreadLabel>,
}

pub(super) async fn get_thread(
    State(state): State<AppState>,
    _session: CurrentSession,
    Path(thread_id): Path<String>,
) -> Result<Json<ThreadDetail>, ApiError> {
    let detail = with_store(&state.store, move |store| {
        let Some(thread) = store.get_thread(&thread_id)? else {
            return Ok(None);
        };
        let emails = store.list_emails(&thread_id, EmailOrder::OldestFirst, None)?;
        let labels = store.list_thread_labels(&thread_id)?;
        Ok(Some(ThreadDetail {
            thread,
            emails,
            labels,
        }))
    })
    .await?
    .ok_or_else(|| ApiError::not_found("Thread"))?;
    Ok(Json(detail))
}

pub(super) async fn update_thread(
    State(state): State<AppState>,
    _session: CurrentSession,
    Path(thread_id): Path<String>,
    ApiJson(patch): ApiJson<ThreadFlagsPatch>,
) -> Result<Json<Thread>, ApiError> {
    if patch.is_empty() {
        return Err(ApiError::BadRequest(
            "expected at least one of isRead, isArchived, isTrashed".to_string(),
        ));
    }
    let change = patch.describe();
    let id = thread_id.clone();
    let thread = with_store(&state.store, move |store| store.update_thread_flags(&id, &patch))
        .await?
        .ok_or_else(|| ApiError::not_found("Thread"))?;
    state.bus.publish(&BusEvent::thread_updated(&thread_id, change));
    Ok(Json(thread))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ApplyLabel {
    label_id: String,
}

/// Applies a label as the user. Re-applying an existing label changes
/// nothing and still succeeds.
pub(super) async fn apply_label(
    State(state): State<AppState>,
    _session: CurrentSession,
    Path(thread_id): Path<String>,
    ApiJson(request): ApiJson<ApplyLabel>,
) -> Result<Json<Vec<ThreadLabel>>, ApiError> {
    let id = thread_id.clone();
    let (inserted, labels) = with_store(&state.store, move |store| {
        if store.get_thread(&id)?.is_none() {
            return Ok(None);
        }
        if store.get_label(&request.label_id)?.is_none() {
            return Ok(Some((None, Vec::new())));
        }
        let inserted = store.apply_label(&id, &request.label_id, LabelApplication::User)?;
        Ok(Some((Some(inserted), store.list_thread_labels(&id)?)))
    })
    .await?
    .ok_or_else(|| ApiError::not_found("Thread"))?;
    let inserted = inserted.ok_or_else(|| ApiError::not_found("Label"))?;
    if inserted {
        state.bus.publish(&BusEvent::thread_updated(&thread_id, "labels"));
    }
    Ok(Json(labels))
}

pub(super) async fn remove_label(
    State(state): State<AppState>,
    _session: CurrentSession,
    Path((thread_id, label_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let id = thread_id.clone();
    let removed = with_store(&state.store, move |store| store.remove_label(&id, &label_id)).await?;
    if !removed {
        return Err(ApiError::not_found("Thread label"));
    }
    state.bus.publish(&BusEvent::thread_updated(&thread_id, "labels"));
    Ok(StatusCode::NO_CONTENT)
}
