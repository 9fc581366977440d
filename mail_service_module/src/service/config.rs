use std::env;
use std::time::Duration;

use send_emails_module::DEFAULT_POSTMARK_API_BASE_URL;

use crate::ai::ClassifyTarget;
use crate::llm::{
    LlmConfig, LlmProvider, DEFAULT_LLM_TIMEOUT, DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL,
    DEFAULT_OPENAI_URL,
};
use crate::notifications::{DEFAULT_MAX_SUBSCRIBERS, DEFAULT_PING_INTERVAL};

use super::BoxError;

pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// `production` turns unsigned webhooks and the in-memory store off.
    pub app_env: String,
    pub database_url: Option<String>,
    pub database_tls_allow_invalid_certs: bool,
    pub llm: LlmConfig,
    pub postmark_server_token: Option<String>,
    pub postmark_api_base_url: String,
    /// Overrides the mailbox address as the `From` of outbound mail.
    pub mail_from_address: Option<String>,
    pub webhook_secret: Option<String>,
    pub sse_max_subscribers: usize,
    pub sse_ping_interval: Duration,
    pub classify_target: ClassifyTarget,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub session_ttl: Duration,
    pub max_body_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9001,
            app_env: "development".to_string(),
            database_url: None,
            database_tls_allow_invalid_certs: false,
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                openai_api_key: None,
                openai_url: DEFAULT_OPENAI_URL.to_string(),
                ollama_url: DEFAULT_OLLAMA_URL.to_string(),
                model: DEFAULT_OLLAMA_MODEL.to_string(),
                timeout: DEFAULT_LLM_TIMEOUT,
            },
            postmark_server_token: None,
            postmark_api_base_url: DEFAULT_POSTMARK_API_BASE_URL.to_string(),
            mail_from_address: None,
            webhook_secret: None,
            sse_max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
            sse_ping_interval: DEFAULT_PING_INTERVAL,
            classify_target: ClassifyTarget::default(),
            admin_email: None,
            admin_password: None,
            session_ttl: DEFAULT_SESSION_TTL,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let host = env::var("MAJUMAIL_HOST").unwrap_or(defaults.host);
        let port = env::var("MAJUMAIL_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(defaults.port);
        let app_env = non_empty("APP_ENV")
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or(defaults.app_env);

        let database_url = non_empty("DATABASE_URL");
        if database_url.is_none() && app_env == "production" {
            return Err("DATABASE_URL must be set in production".into());
        }

        let classify_target = match non_empty("CLASSIFY_MESSAGE") {
            Some(value) => value
                .parse::<ClassifyTarget>()
                .map_err(|err| format!("invalid CLASSIFY_MESSAGE: {}", err))?,
            None => defaults.classify_target,
        };

        let sse_ping_interval = parse_number::<u64>("SSE_PING_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.sse_ping_interval);
        let session_ttl = parse_number::<u64>("SESSION_TTL_HOURS")
            .filter(|hours| *hours > 0)
            .map(|hours| Duration::from_secs(hours * 60 * 60))
            .unwrap_or(defaults.session_ttl);

        Ok(Self {
            host,
            port,
            app_env,
            database_url,
            database_tls_allow_invalid_certs: env_flag("DATABASE_TLS_ALLOW_INVALID_CERTS"),
            llm: LlmConfig::from_env(),
            postmark_server_token: non_empty("POSTMARK_SERVER_TOKEN"),
            postmark_api_base_url: non_empty("POSTMARK_API_BASE_URL")
                .unwrap_or(defaults.postmark_api_base_url),
            mail_from_address: non_empty("MAIL_FROM_ADDRESS"),
            webhook_secret: non_empty("WEBHOOK_SECRET"),
            sse_max_subscribers: parse_number::<usize>("SSE_MAX_SUBSCRIBERS")
                .filter(|max| *max > 0)
                .unwrap_or(defaults.sse_max_subscribers),
            sse_ping_interval,
            classify_target,
            admin_email: non_empty("ADMIN_EMAIL").map(|value| value.to_ascii_lowercase()),
            admin_password: non_empty("ADMIN_PASSWORD"),
            session_ttl,
            max_body_bytes: parse_number::<usize>("MAJUMAIL_MAX_BODY_BYTES")
                .unwrap_or(defaults.max_body_bytes),
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    non_empty(key).and_then(|value| value.parse::<T>().ok())
}

fn env_flag(key: &str) -> bool {
    non_empty(key)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    const KEYS: [&str; 8] = [
        "MAJUMAIL_PORT",
        "APP_ENV",
        "DATABASE_URL",
        "CLASSIFY_MESSAGE",
        "SSE_MAX_SUBSCRIBERS",
        "SSE_PING_INTERVAL_SECS",
        "SESSION_TTL_HOURS",
        "ADMIN_EMAIL",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn reads_overrides_from_env() {
        clear_env();
        env::set_var("MAJUMAIL_PORT", "9100");
        env::set_var("CLASSIFY_MESSAGE", "latest");
        env::set_var("SSE_MAX_SUBSCRIBERS", "8");
        env::set_var("SSE_PING_INTERVAL_SECS", "5");
        env::set_var("SESSION_TTL_HOURS", "2");
        env::set_var("ADMIN_EMAIL", "Admin@Example.com");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.classify_target, ClassifyTarget::Latest);
        assert_eq!(config.sse_max_subscribers, 8);
        assert_eq!(config.sse_ping_interval, Duration::from_secs(5));
        assert_eq!(config.session_ttl, Duration::from_secs(7200));
        assert_eq!(config.admin_email.as_deref(), Some("admin@example.com"));
        clear_env();
    }

    #[test]
    #[serial]
    fn production_requires_a_database() {
        clear_env();
        env::set_var("APP_ENV", "production");
        assert!(ServiceConfig::from_env().is_err());
        env::set_var("DATABASE_URL", "postgres://localhost/majumail");
        assert!(ServiceConfig::from_env().unwrap().is_production());
        clear_env();
    }

    #[test]
    #[serial]
    fn bad_classify_target_is_rejected() {
        clear_env();
        env::set_var("CLASSIFY_MESSAGE", "middle");
        assert!(ServiceConfig::from_env().is_err());
        clear_env();
    }
}
