//! Outbound email delivery through the Postmark transactional API.
//!
//! Configuration:
//! - `POSTMARK_SERVER_TOKEN`: server token sent as `X-Postmark-Server-Token`
//! - `POSTMARK_API_BASE_URL`: API base (default: `https://api.postmarkapp.com`)

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_POSTMARK_API_BASE_URL: &str = "https://api.postmarkapp.com";

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SendEmailError {
    #[error("postmark server token not configured")]
    MissingToken,
    #[error("email has no recipients")]
    NoRecipients,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("postmark rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// A message ready to be handed to the provider.
#[derive(Debug, Clone, Default)]
pub struct OutboundEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub reply_to: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub provider_message_id: String,
    pub submitted_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PostmarkSender {
    client: Client,
    api_base_url: String,
    server_token: Option<String>,
}

impl PostmarkSender {
    pub fn new(api_base_url: impl Into<String>, server_token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            server_token: server_token.filter(|token| !token.trim().is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.server_token.is_some()
    }

    pub async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, SendEmailError> {
        let token = self
            .server_token
            .as_deref()
            .ok_or(SendEmailError::MissingToken)?;
        if email.to.is_empty() {
            return Err(SendEmailError::NoRecipients);
        }

        let request = PostmarkEmailRequest::from(email);
        let url = format!("{}/email", self.api_base_url);
        debug!("postmark send to={} subject={}", request.to, request.subject);

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<PostmarkEmailResponse>().await {
                Ok(body) => body.message.unwrap_or_default(),
                Err(_) => String::new(),
            };
            return Err(SendEmailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: PostmarkEmailResponse = response.json().await?;
        if body.error_code.unwrap_or(0) != 0 {
            return Err(SendEmailError::Rejected {
                status: status.as_u16(),
                message: body.message.unwrap_or_default(),
            });
        }
        let provider_message_id = body.message_id.unwrap_or_default();
        info!("postmark accepted message {}", provider_message_id);
        Ok(SendReceipt {
            provider_message_id,
            submitted_at: body.submitted_at,
        })
    }
}

#[derive(Debug, Serialize)]
struct PostmarkEmailRequest {
    #[serde(rename = "From")]
    from: String,
    #[serde(rename = "To")]
    to: String,
    #[serde(rename = "Subject")]
    subject: String,
    #[serde(rename = "TextBody")]
    text_body: String,
    #[serde(rename = "HtmlBody", skip_serializing_if = "Option::is_none")]
    html_body: Option<String>,
    #[serde(rename = "ReplyTo", skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    #[serde(rename = "Headers", skip_serializing_if = "Vec::is_empty")]
    headers: Vec<PostmarkHeader>,
    #[serde(rename = "MessageStream")]
    message_stream: &'static str,
}

#[derive(Debug, Serialize)]
struct PostmarkHeader {
    #[serde(rename = "Name")]
    name: &'static str,
    #[serde(rename = "Value")]
    value: String,
}

impl From<&OutboundEmail> for PostmarkEmailRequest {
    fn from(email: &OutboundEmail) -> Self {
        let mut headers = Vec::new();
        if let Some(value) = email.in_reply_to.as_ref() {
            headers.push(PostmarkHeader {
                name: "In-Reply-To",
                value: value.clone(),
            });
        }
        if let Some(value) = email.references.as_ref() {
            headers.push(PostmarkHeader {
                name: "References",
                value: value.clone(),
            });
        }
        Self {
            from: email.from.clone(),
            to: email.to.join(", "),
            subject: email.subject.clone(),
            text_body: email.text_body.clone(),
            html_body: email.html_body.clone(),
            reply_to: email.reply_to.clone(),
            headers,
            message_stream: "outbound",
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostmarkEmailResponse {
    #[serde(rename = "MessageID")]
    message_id: Option<String>,
    #[serde(rename = "SubmittedAt")]
    submitted_at: Option<String>,
    #[serde(rename = "ErrorCode")]
    error_code: Option<i64>,
    #[serde(rename = "Message")]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_threading_headers() {
        let email = OutboundEmail {
            from: "team@majumail.test".to_string(),
            to: vec!["a@example.com".to_string(), "b@example.com".to_string()],
            subject: "Re: hello".to_string(),
            text_body: "hi".to_string(),
            in_reply_to: Some("<abc@mail>".to_string()),
            references: Some("<root@mail> <abc@mail>".to_string()),
            ..OutboundEmail::default()
        };
        let request = PostmarkEmailRequest::from(&email);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["To"], "a@example.com, b@example.com");
        assert_eq!(value["Headers"][0]["Name"], "In-Reply-To");
        assert_eq!(value["Headers"][1]["Value"], "<root@mail> <abc@mail>");
        assert!(value.get("HtmlBody").is_none());
    }

    #[tokio::test]
    async fn send_without_token_is_rejected_locally() {
        let sender = PostmarkSender::new(DEFAULT_POSTMARK_API_BASE_URL, Some("  ".to_string()));
        assert!(!sender.is_configured());
        let err = sender
            .send(&OutboundEmail {
                to: vec!["a@example.com".to_string()],
                ..OutboundEmail::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SendEmailError::MissingToken));
    }
}
