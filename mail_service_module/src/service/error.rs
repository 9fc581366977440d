use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, error};

use crate::ai::PipelineError;
use crate::notifications::BusError;
use crate::store::StoreError;

/// Every failure a handler can report. Internal causes are logged and never
/// sent to the client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("[{component}] {message}")]
    Internal {
        component: &'static str,
        message: String,
    },
}

impl ApiError {
    pub fn internal(component: &'static str, err: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            component,
            message: err.to_string(),
        }
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(format!("{what} not found"))
    }

    /// Maps a pipeline failure; `component` tags the log line.
    pub fn pipeline(component: &'static str, err: PipelineError) -> Self {
        match err {
            PipelineError::ThreadNotFound(_) => ApiError::not_found("Thread"),
            PipelineError::Invalid(message) => ApiError::BadRequest(message),
            other => ApiError::internal(component, other),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => ApiError::BadRequest(message),
            other => ApiError::internal("store", other),
        }
    }
}

impl From<BusError> for ApiError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Full(_) | BusError::Closed => ApiError::Unavailable(err.to_string()),
            BusError::LockPoisoned => ApiError::internal("sse", err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("rejected request body: {}", rejection.body_text());
        ApiError::BadRequest("Invalid request body".to_string())
    }
}

/// `Json` whose rejections answer with the usual `{"error"}` body.
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal { component, message } => {
                error!("[{}] {}", component, message);
                "Internal server error".to_string()
            }
            ApiError::Unauthorized => "Unauthorized".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn internal_details_stay_out_of_the_response() {
        let response = ApiError::internal("ai/classify", "model timed out").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(response).await;
        assert_eq!(body, r#"{"error":"Internal server error"}"#);
        assert!(!body.contains("model timed out"));
    }

    #[test]
    fn pipeline_errors_map_to_client_statuses() {
        let missing = ApiError::pipeline("ai/summarize", PipelineError::ThreadNotFound("t".into()));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let invalid = ApiError::pipeline("ai/classify", PipelineError::Invalid("bad".into()));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn full_bus_is_unavailable() {
        assert_eq!(ApiError::from(BusError::Full(4)).status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
