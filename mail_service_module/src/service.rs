mod ai_routes;
mod auth;
mod config;
mod emails;
mod error;
mod inbound;
mod labels;
mod server;
mod sse;
mod state;
mod threads;
mod verify;
mod webhooks;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use auth::{CurrentSession, SESSION_COOKIE};
pub use config::{ServiceConfig, DEFAULT_MAX_BODY_BYTES};
pub use error::ApiError;
pub use inbound::{InboundOutcome, PostmarkInbound};
pub use server::{build_router, open_store, run_server};
pub use state::AppState;
