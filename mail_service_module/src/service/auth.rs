use axum::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::Session;
use crate::store::with_store;

use super::error::{ApiError, ApiJson};
use super::state::AppState;

pub const SESSION_COOKIE: &str = "majumail_session";

/// Extract Bearer token from the Authorization header, falling back to the
/// session cookie.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if bearer.is_some() {
        return bearer;
    }
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// A valid, unexpired session. Handlers that take this reject anonymous
/// requests with 401.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let lookup = token.clone();
        let session = with_store(&state.store, move |store| store.find_session(&lookup))
            .await?
            .ok_or(ApiError::Unauthorized)?;
        if session.is_expired(Utc::now()) {
            let expired = token;
            with_store(&state.store, move |store| store.delete_session(&expired)).await?;
            return Err(ApiError::Unauthorized);
        }
        Ok(CurrentSession(session))
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct LoginResponse {
    token: String,
    expires_at: chrono::DateTime<Utc>,
}

/// POST /api/auth/login
pub(super) async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(admin_email), Some(admin_password)) =
        (&state.config.admin_email, &state.config.admin_password)
    else {
        return Err(ApiError::Unavailable("login is not configured".to_string()));
    };
    let email = request.email.trim().to_ascii_lowercase();
    if email != *admin_email || request.password != *admin_password {
        warn!("rejected login for {}", email);
        return Err(ApiError::Unauthorized);
    }

    let ttl = ChronoDuration::from_std(state.config.session_ttl)
        .unwrap_or_else(|_| ChronoDuration::hours(24));
    let session = Session {
        token: format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()),
        user_email: email,
        expires_at: Utc::now() + ttl,
    };
    let stored = session.clone();
    with_store(&state.store, move |store| store.create_session(&stored)).await?;
    info!("session opened for {}", session.user_email);

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        session.token,
        ttl.num_seconds()
    );
    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(LoginResponse {
            token: session.token,
            expires_at: session.expires_at,
        }),
    ))
}

/// POST /api/auth/logout
pub(super) async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<impl IntoResponse, ApiError> {
    let token = session.token.clone();
    with_store(&state.store, move |store| store.delete_session(&token)).await?;
    info!("session closed for {}", session.user_email);
    let cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE);
    Ok((StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]))
}
