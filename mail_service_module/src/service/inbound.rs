use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ai::{load_settings, ClassifyRequest};
use crate::models::{Direction, Email, Mailbox, NewEmail};
use crate::notifications::{BusEvent, NewEmailNotice};
use crate::store::{normalize_message_id, with_store};

use super::error::ApiError;
use super::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct PostmarkInbound {
    #[serde(rename = "From")]
    pub(super) from: Option<String>,
    #[serde(rename = "To")]
    pub(super) to: Option<String>,
    #[serde(rename = "Cc")]
    pub(super) cc: Option<String>,
    #[serde(rename = "ToFull")]
    pub(super) to_full: Option<Vec<PostmarkRecipient>>,
    #[serde(rename = "CcFull")]
    pub(super) cc_full: Option<Vec<PostmarkRecipient>>,
    #[serde(rename = "Subject")]
    pub(super) subject: Option<String>,
    #[serde(rename = "TextBody")]
    pub(super) text_body: Option<String>,
    #[serde(rename = "HtmlBody")]
    pub(super) html_body: Option<String>,
    #[serde(rename = "MessageID", alias = "MessageId")]
    pub(super) message_id: Option<String>,
    #[serde(rename = "Date")]
    pub(super) date: Option<String>,
    #[serde(rename = "Headers")]
    pub(super) headers: Option<Vec<PostmarkHeader>>,
}

impl PostmarkInbound {
    fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .as_ref()
            .map(|headers| {
                headers
                    .iter()
                    .filter(|header| header.name.eq_ignore_ascii_case(name))
                    .map(|header| header.value.as_str())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    }

    /// RFC Message-ID header first; Postmark's own id otherwise.
    fn rfc_message_id(&self) -> Option<String> {
        self.header_values("Message-ID")
            .into_iter()
            .next()
            .or(self.message_id.as_deref())
            .and_then(normalize_message_id)
    }

    /// Ids this message answers, nearest first.
    fn referenced_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        for header in ["In-Reply-To", "References"] {
            let mut values: Vec<String> = self
                .header_values(header)
                .into_iter()
                .flat_map(|value| value.split_whitespace())
                .filter_map(normalize_message_id)
                .collect();
            if header == "References" {
                values.reverse();
            }
            for id in values {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    fn sent_at(&self) -> DateTime<Utc> {
        self.date
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc2822(raw.trim()).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct PostmarkRecipient {
    #[serde(rename = "Email")]
    email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct PostmarkHeader {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundOutcome {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_id: Option<String>,
}

impl InboundOutcome {
    fn ignored() -> Self {
        Self {
            status: "ignored",
            thread_id: None,
            email_id: None,
        }
    }
}

/// Every address the message was delivered to, in header order.
fn recipient_candidates(payload: &PostmarkInbound) -> Vec<String> {
    let mut raw: Vec<&str> = Vec::new();
    raw.extend(payload.to.as_deref());
    raw.extend(payload.cc.as_deref());
    for list in [&payload.to_full, &payload.cc_full].into_iter().flatten() {
        raw.extend(list.iter().map(|entry| entry.email.as_str()));
    }
    for header in ["X-Original-To", "Delivered-To", "Envelope-To", "X-Envelope-To"] {
        raw.extend(payload.header_values(header));
    }

    let mut seen = HashSet::new();
    raw.into_iter()
        .flat_map(extract_emails)
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

/// Bare lower-cased addresses found in a header value such as
/// `"Name, Inc" <a@b.com>, c@d.com`.
pub(super) fn extract_emails(raw: &str) -> Vec<String> {
    let mut emails = Vec::new();
    let mut seen = HashSet::new();

    let mut remainder = raw;
    while let Some(start) = remainder.find('<') {
        let after_start = &remainder[start + 1..];
        let Some(end) = after_start.find('>') else {
            break;
        };
        if let Some(email) = normalize_email(&after_start[..end]) {
            if seen.insert(email.clone()) {
                emails.push(email);
            }
        }
        remainder = &after_start[end + 1..];
    }

    for token in raw.split(|ch| matches!(ch, ',' | ';' | ' ' | '\t' | '\n' | '\r')) {
        if let Some(email) = normalize_email(token) {
            if seen.insert(email.clone()) {
                emails.push(email);
            }
        }
    }
    emails
}

fn normalize_email(raw: &str) -> Option<String> {
    let mut value = raw.trim();
    if let Some(stripped) = value.strip_prefix("mailto:") {
        value = stripped.trim();
    }
    value = value.trim_matches(|ch: char| matches!(ch, '<' | '>' | '"' | '\'' | ',' | ';'));
    let (local, domain) = value.split_once('@')?;
    let (local, domain) = (local.trim(), domain.trim());
    if local.is_empty() || domain.is_empty() || local.contains(' ') || domain.contains(' ') {
        return None;
    }
    Some(format!(
        "{}@{}",
        local.to_ascii_lowercase(),
        domain.to_ascii_lowercase()
    ))
}

/// Stores one inbound message: mailbox by recipient, thread by reply
/// headers, then publishes `new_email` and kicks off auto-classification.
pub(super) async fn process_inbound(
    state: &AppState,
    payload: PostmarkInbound,
) -> Result<InboundOutcome, ApiError> {
    let from_raw = payload.from.as_deref().unwrap_or("");
    let Some(from_address) = extract_emails(from_raw).into_iter().next() else {
        return Err(ApiError::BadRequest("missing sender address".to_string()));
    };

    let candidates = recipient_candidates(&payload);
    let lookup = candidates.clone();
    let mailbox: Option<Mailbox> = with_store(&state.store, move |store| {
        for address in &lookup {
            if let Some(mailbox) = store.find_mailbox_by_address(address)? {
                return Ok(Some(mailbox));
            }
        }
        Ok(None)
    })
    .await?;
    let Some(mailbox) = mailbox else {
        info!(
            "no mailbox for inbound recipients {:?}; skipping",
            candidates
        );
        return Ok(InboundOutcome::ignored());
    };

    let subject = payload
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("(no subject)")
        .to_string();
    let sent_at = payload.sent_at();
    let references = payload.referenced_ids();
    let mailbox_id = mailbox.id.clone();
    let new_email = NewEmail {
        thread_id: String::new(),
        message_id: payload.rfc_message_id(),
        from_address: from_address.clone(),
        to_addresses: candidates,
        subject: subject.clone(),
        body_text: payload.text_body.clone().unwrap_or_default(),
        body_html: payload.html_body.clone().filter(|html| !html.trim().is_empty()),
        direction: Direction::Inbound,
        sent_at,
    };

    let (email, created_thread): (Email, bool) = with_store(&state.store, move |store| {
        let matched = if references.is_empty() {
            None
        } else {
            store.find_thread_by_message_ids(&references)?
        };
        let existing = match matched {
            Some(thread_id) => store
                .get_thread(&thread_id)?
                .filter(|thread| thread.mailbox_id == mailbox_id),
            None => None,
        };
        let (thread_id, created) = match existing {
            Some(thread) => (thread.id, false),
            None => (store.create_thread(&mailbox_id, &subject, sent_at)?.id, true),
        };
        let email = store.insert_email(NewEmail {
            thread_id,
            ..new_email
        })?;
        Ok((email, created))
    })
    .await?;

    info!(
        "inbound email {} from {} stored in {} thread {}",
        email.id,
        email.from_address,
        if created_thread { "new" } else { "existing" },
        email.thread_id
    );
    state.bus.publish(&BusEvent::NewEmail {
        data: NewEmailNotice {
            thread_id: email.thread_id.clone(),
            email_id: email.id.clone(),
            mailbox_id: mailbox.id.clone(),
            from_address: email.from_address.clone(),
            subject: email.subject.clone(),
        },
    });

    spawn_auto_classify(state, &email.thread_id);

    Ok(InboundOutcome {
        status: "stored",
        thread_id: Some(email.thread_id),
        email_id: Some(email.id),
    })
}

fn spawn_auto_classify(state: &AppState, thread_id: &str) {
    let store = state.store.clone();
    let classifier = state.classifier.clone();
    let thread_id = thread_id.to_string();
    tokio::spawn(async move {
        let settings = match load_settings(&store).await {
            Ok(settings) => settings,
            Err(err) => {
                warn!("[ai/classify] settings unavailable for auto-classify: {}", err);
                return;
            }
        };
        if !(settings.auto_classify && settings.auto_apply_labels) {
            return;
        }
        let request = ClassifyRequest {
            thread_id: thread_id.clone(),
            apply_labels: true,
            min_confidence: Some(i64::from(settings.min_confidence)),
        };
        if let Err(err) = classifier.classify(&request).await {
            warn!("[ai/classify] auto-classify failed for thread {}: {}", thread_id, err);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: serde_json::Value) -> PostmarkInbound {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn extracts_addresses_from_display_names() {
        let raw = "\"Acme, Inc\" <Billing@Acme.com>, other@example.com";
        assert_eq!(
            extract_emails(raw),
            vec!["billing@acme.com", "other@example.com"]
        );
        assert!(extract_emails("undisclosed-recipients:;").is_empty());
    }

    #[test]
    fn candidates_cover_headers_and_full_lists_without_duplicates() {
        let inbound = payload(serde_json::json!({
            "From": "a@example.com",
            "To": "Support <support@majumail.test>",
            "ToFull": [{"Email": "support@majumail.test"}],
            "Headers": [{"Name": "X-Original-To", "Value": "sales@majumail.test"}]
        }));
        assert_eq!(
            recipient_candidates(&inbound),
            vec!["support@majumail.test", "sales@majumail.test"]
        );
    }

    #[test]
    fn reply_headers_are_normalized_nearest_first() {
        let inbound = payload(serde_json::json!({
            "Headers": [
                {"Name": "Message-ID", "Value": "<New@Mail.Test>"},
                {"Name": "In-Reply-To", "Value": "<b@mail.test>"},
                {"Name": "References", "Value": "<a@mail.test> <b@mail.test>"}
            ]
        }));
        assert_eq!(inbound.rfc_message_id().as_deref(), Some("new@mail.test"));
        assert_eq!(inbound.referenced_ids(), vec!["b@mail.test", "a@mail.test"]);
    }

    #[test]
    fn rfc2822_dates_are_parsed() {
        let inbound = payload(serde_json::json!({"Date": "Tue, 1 Jul 2025 10:00:00 +0200"}));
        assert_eq!(inbound.sent_at().to_rfc3339(), "2025-07-01T08:00:00+00:00");
    }
}
