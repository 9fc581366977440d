use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use futures::stream::{self, Stream};
use tracing::debug;

use crate::notifications::Subscription;

use super::auth::CurrentSession;
use super::error::ApiError;
use super::state::AppState;

/// GET /api/sse: one `data: <json>` frame per bus event. The subscription
/// is dropped, and so unsubscribed, when the client goes away.
pub(super) async fn events(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state.bus.subscribe()?;
    debug!(
        "sse stream {} opened for {}",
        subscription.id(),
        session.user_email
    );
    Ok(Sse::new(event_stream(subscription)))
}

fn event_stream(subscription: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.next_event().await?;
        Some((Ok(Event::default().data(event.to_json())), subscription))
    })
}
