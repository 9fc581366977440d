use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use send_emails_module::{OutboundEmail, SendEmailError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{Direction, EmailOrder, Mailbox, NewEmail, Thread};
use crate::notifications::{BusEvent, NewEmailNotice};
use crate::store::{normalize_message_id, with_store};

use super::auth::CurrentSession;
use super::error::{ApiError, ApiJson};
use super::inbound::extract_emails;
use super::state::AppState;

/// Postmark sets outgoing Message-ID headers to `<{MessageID}@mtasv.net>`.
const POSTMARK_MESSAGE_ID_DOMAIN: &str = "mtasv.net";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendRequest {
    thread_id: Option<String>,
    mailbox_id: Option<String>,
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    text: String,
    html: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendResponse {
    thread_id: String,
    email_id: String,
    provider_message_id: String,
}

struct SendTarget {
    mailbox: Mailbox,
    thread: Option<Thread>,
    last_message_id: Option<String>,
}

async fn resolve_target(state: &AppState, request: &SendRequest) -> Result<SendTarget, ApiError> {
    let thread_id = request.thread_id.clone().filter(|id| !id.is_empty());
    let mailbox_id = request.mailbox_id.clone().filter(|id| !id.is_empty());
    let target = with_store(&state.store, move |store| {
        if let Some(thread_id) = thread_id {
            let Some(thread) = store.get_thread(&thread_id)? else {
                return Ok(Err(ApiError::not_found("Thread")));
            };
            let Some(mailbox) = store.get_mailbox(&thread.mailbox_id)? else {
                return Ok(Err(ApiError::not_found("Mailbox")));
            };
            let last_message_id = store
                .list_emails(&thread.id, EmailOrder::NewestFirst, None)?
                .into_iter()
                .find_map(|email| email.message_id);
            return Ok(Ok(SendTarget {
                mailbox,
                thread: Some(thread),
                last_message_id,
            }));
        }
        let mailbox = match mailbox_id {
            Some(mailbox_id) => store.get_mailbox(&mailbox_id)?,
            None => store.list_mailboxes()?.into_iter().next(),
        };
        Ok(match mailbox {
            Some(mailbox) => Ok(SendTarget {
                mailbox,
                thread: None,
                last_message_id: None,
            }),
            None => Err(ApiError::not_found("Mailbox")),
        })
    })
    .await?;
    target
}

/// POST /api/emails/send: hands the message to Postmark, then stores it as
/// outbound mail in its thread (a new one when no thread is given).
pub(super) async fn send_email(
    State(state): State<AppState>,
    _session: CurrentSession,
    ApiJson(request): ApiJson<SendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let recipients: Vec<String> = request.to.iter().flat_map(|raw| extract_emails(raw)).collect();
    if recipients.is_empty() {
        return Err(ApiError::BadRequest("at least one recipient is required".to_string()));
    }
    let html_empty = request
        .html
        .as_deref()
        .map_or(true, |html| html.trim().is_empty());
    if request.text.trim().is_empty() && html_empty {
        return Err(ApiError::BadRequest("message body is empty".to_string()));
    }
    if !state.sender.is_configured() {
        return Err(ApiError::Unavailable("email delivery is not configured".to_string()));
    }

    let target = resolve_target(&state, &request).await?;
    let subject = match (request.subject.trim(), &target.thread) {
        ("", Some(thread)) if thread.subject.to_ascii_lowercase().starts_with("re:") => {
            thread.subject.clone()
        }
        ("", Some(thread)) => format!("Re: {}", thread.subject),
        ("", None) => "(no subject)".to_string(),
        (subject, _) => subject.to_string(),
    };
    let from = state
        .config
        .mail_from_address
        .clone()
        .unwrap_or_else(|| format!("{} <{}>", target.mailbox.name, target.mailbox.address));
    let reply_header = target.last_message_id.as_ref().map(|id| format!("<{id}>"));
    let outbound = OutboundEmail {
        from,
        to: recipients.clone(),
        subject: subject.clone(),
        text_body: request.text.clone(),
        html_body: request.html.clone().filter(|html| !html.trim().is_empty()),
        reply_to: Some(target.mailbox.address.clone()),
        in_reply_to: reply_header.clone(),
        references: reply_header,
    };

    let receipt = state.sender.send(&outbound).await.map_err(|err| match err {
        SendEmailError::NoRecipients => {
            ApiError::BadRequest("at least one recipient is required".to_string())
        }
        SendEmailError::Rejected { status, message } if (400..500).contains(&status) => {
            warn!("postmark rejected outbound mail: {}", message);
            ApiError::BadRequest(format!("delivery rejected: {message}"))
        }
        other => ApiError::internal("email/send", other),
    })?;

    let sent_at = Utc::now();
    let mailbox_id = target.mailbox.id.clone();
    let existing_thread = target.thread.map(|thread| thread.id);
    let message_id = normalize_message_id(&format!(
        "{}@{}",
        receipt.provider_message_id, POSTMARK_MESSAGE_ID_DOMAIN
    ))
    .filter(|_| !receipt.provider_message_id.is_empty());
    let new_email = NewEmail {
        thread_id: String::new(),
        message_id,
        from_address: target.mailbox.address.clone(),
        to_addresses: recipients,
        subject: subject.clone(),
        body_text: outbound.text_body,
        body_html: outbound.html_body,
        direction: Direction::Outbound,
        sent_at,
    };
    let email = with_store(&state.store, move |store| {
        let thread_id = match existing_thread {
            Some(thread_id) => thread_id,
            None => store.create_thread(&mailbox_id, &subject, sent_at)?.id,
        };
        store.insert_email(NewEmail {
            thread_id,
            ..new_email
        })
    })
    .await?;

    info!(
        "outbound email {} sent in thread {} (provider id {})",
        email.id, email.thread_id, receipt.provider_message_id
    );
    state.bus.publish(&BusEvent::NewEmail {
        data: NewEmailNotice {
            thread_id: email.thread_id.clone(),
            email_id: email.id.clone(),
            mailbox_id: target.mailbox.id,
            from_address: email.from_address.clone(),
            subject: email.subject.clone(),
        },
    });
    state.bus.publish(&BusEvent::thread_updated(&email.thread_id, "sent"));

    Ok((
        StatusCode::CREATED,
        Json(SendResponse {
            thread_id: email.thread_id,
            email_id: email.id,
            provider_message_id: receipt.provider_message_id,
        }),
    ))
}
