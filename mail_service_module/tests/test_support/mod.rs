#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use mail_service_module::ai::ClassifyTarget;
use mail_service_module::llm::LlmConfig;
use mail_service_module::models::{Direction, Email, Mailbox, NewEmail, Thread};
use mail_service_module::service::{build_router, AppState, ServiceConfig};
use mail_service_module::store::{MailStore, MemoryMailStore, NewLabel};

pub const ADMIN_EMAIL: &str = "admin@majumail.test";
pub const ADMIN_PASSWORD: &str = "correct horse";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryMailStore>,
}

pub struct AppOptions {
    pub llm_url: String,
    pub postmark_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub app_env: &'static str,
    pub max_subscribers: usize,
    pub classify_target: ClassifyTarget,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            // Nothing listens here; tests that reach the model mount a mock.
            llm_url: "http://127.0.0.1:9".to_string(),
            postmark_url: None,
            webhook_secret: None,
            app_env: "test",
            max_subscribers: 16,
            classify_target: ClassifyTarget::Oldest,
        }
    }
}

pub fn test_app(options: AppOptions) -> TestApp {
    let store = Arc::new(MemoryMailStore::new());
    let dyn_store: Arc<dyn MailStore> = store.clone();
    let config = ServiceConfig {
        app_env: options.app_env.to_string(),
        llm: LlmConfig::openai(options.llm_url, "test-key"),
        postmark_api_base_url: options
            .postmark_url
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:9".to_string()),
        postmark_server_token: options.postmark_url.map(|_| "pm-token".to_string()),
        webhook_secret: options.webhook_secret,
        sse_max_subscribers: options.max_subscribers,
        classify_target: options.classify_target,
        admin_email: Some(ADMIN_EMAIL.to_string()),
        admin_password: Some(ADMIN_PASSWORD.to_string()),
        ..ServiceConfig::default()
    };
    let state = AppState::new(config, dyn_store);
    TestApp {
        router: build_router(state.clone()),
        state,
        store,
    }
}

impl TestApp {
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn login(&self) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({"email": ADMIN_EMAIL, "password": ADMIN_PASSWORD})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["token"].as_str().unwrap().to_string()
    }

    pub fn mailbox(&self) -> Mailbox {
        match self.store.find_mailbox_by_address("support@majumail.test").unwrap() {
            Some(mailbox) => mailbox,
            None => self
                .store
                .create_mailbox("support@majumail.test", "Support")
                .unwrap(),
        }
    }

    /// Thread with `count` inbound emails, one minute apart.
    pub fn thread_with_emails(&self, subject: &str, count: usize) -> (Thread, Vec<Email>) {
        let mailbox = self.mailbox();
        let start: DateTime<Utc> = Utc::now() - Duration::hours(1);
        let thread = self.store.create_thread(&mailbox.id, subject, start).unwrap();
        let emails = (0..count)
            .map(|n| {
                self.store
                    .insert_email(NewEmail {
                        thread_id: thread.id.clone(),
                        message_id: Some(format!("msg-{}-{n}@mail.test", thread.id)),
                        from_address: "customer@example.com".to_string(),
                        to_addresses: vec![mailbox.address.clone()],
                        subject: subject.to_string(),
                        body_text: format!("body {n}"),
                        body_html: None,
                        direction: Direction::Inbound,
                        sent_at: start + Duration::minutes(n as i64),
                    })
                    .unwrap()
            })
            .collect();
        (thread, emails)
    }

    pub fn label_with_rule(&self, name: &str, criteria: &str) -> String {
        let label = self
            .store
            .create_label(NewLabel {
                name: name.to_string(),
                color: "#ff0000".to_string(),
                sort_order: 0,
                auto_classify: true,
            })
            .unwrap();
        self.store.create_rule(&label.id, criteria, true).unwrap();
        label.id
    }
}

/// OpenAI-style chat completion body carrying `content`.
pub fn completion_body(content: &str) -> String {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    })
    .to_string()
}
