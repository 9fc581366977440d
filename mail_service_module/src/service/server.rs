use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tokio::task;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::store::{MailStore, MemoryMailStore, PostgresMailStore};

use super::config::ServiceConfig;
use super::state::AppState;
use super::{ai_routes, auth, emails, labels, sse, threads, webhooks};
use super::BoxError;

/// Postgres when `DATABASE_URL` is set; the in-memory store otherwise,
/// which configuration only allows outside production.
pub async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn MailStore>, BoxError> {
    match config.database_url.clone() {
        Some(url) => {
            let allow_invalid = config.database_tls_allow_invalid_certs;
            let store = task::spawn_blocking(move || PostgresMailStore::new(&url, allow_invalid))
                .await
                .map_err(|err| -> BoxError { err.into() })??;
            info!("using postgres mail store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory mail store (data is lost on restart)");
            Ok(Arc::new(MemoryMailStore::new()))
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route(
            "/api/mailboxes",
            get(threads::list_mailboxes).post(threads::create_mailbox),
        )
        .route("/api/threads", get(threads::list_threads))
        .route(
            "/api/threads/:id",
            get(threads::get_thread).patch(threads::update_thread),
        )
        .route("/api/threads/:id/labels", post(threads::apply_label))
        .route(
            "/api/threads/:id/labels/:label_id",
            delete(threads::remove_label),
        )
        .route("/api/labels", get(labels::list_labels).post(labels::create_label))
        .route(
            "/api/labels/:id",
            patch(labels::update_label).delete(labels::delete_label),
        )
        .route("/api/rules", get(labels::list_rules).post(labels::create_rule))
        .route(
            "/api/rules/:id",
            patch(labels::update_rule).delete(labels::delete_rule),
        )
        .route(
            "/api/knowledge",
            get(labels::list_knowledge).post(labels::create_knowledge),
        )
        .route(
            "/api/knowledge/:id",
            patch(labels::update_knowledge).delete(labels::delete_knowledge),
        )
        .route(
            "/api/ai/settings",
            get(ai_routes::get_settings).post(ai_routes::post_settings),
        )
        .route("/api/ai/classify", post(ai_routes::classify))
        .route("/api/ai/summarize", post(ai_routes::summarize))
        .route("/api/ai/smart-replies", post(ai_routes::smart_replies))
        .route("/api/ai/compose", post(ai_routes::compose))
        .route("/api/emails/send", post(emails::send_email))
        .route("/api/webhooks/inbound", post(webhooks::inbound))
        .route("/api/sse", get(sse::events))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(body_limit))
}

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let store = open_store(&config).await?;
    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);

    let state = AppState::new(config, store);
    info!("language model: {}", state.classifier.describe_model());
    let bus = state.bus().clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("MajuMail service listening on {}", addr);
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            bus.close();
        })
        .await;
    serve_result?;
    info!("MajuMail service stopped");
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
