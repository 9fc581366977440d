//! Chat-completion client used by every AI pipeline.
//!
//! Configuration:
//! - `OPENAI_API_KEY`: OpenAI API key (preferred if set)
//! - `OPENAI_API_URL`: OpenAI-compatible base URL (default: `https://api.openai.com/v1`)
//! - `OLLAMA_URL`: Ollama server URL, used when no OpenAI key is set
//! - `AI_MODEL`: model name (default: `gpt-4o-mini` for OpenAI, `llama3.1:8b` for Ollama)
//! - `LLM_TIMEOUT_SECS`: request timeout (default: 60)

use std::env;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("OPENAI_API_KEY not set")]
    MissingApiKey,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("model returned no content")]
    EmptyResponse,
    #[error("could not parse model output: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Ollama,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub openai_api_key: Option<String>,
    pub openai_url: String,
    pub ollama_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let openai_api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let provider = if openai_api_key.is_some() {
            LlmProvider::OpenAI
        } else {
            LlmProvider::Ollama
        };
        let default_model = match provider {
            LlmProvider::OpenAI => DEFAULT_OPENAI_MODEL,
            LlmProvider::Ollama => DEFAULT_OLLAMA_MODEL,
        };
        let timeout = env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LLM_TIMEOUT);

        Self {
            provider,
            openai_api_key,
            openai_url: env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_URL.to_string()),
            ollama_url: env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string()),
            model: env::var("AI_MODEL").unwrap_or_else(|_| default_model.to_string()),
            timeout,
        }
    }

    /// OpenAI-compatible endpoint at `base_url`; used by tests against a mock.
    pub fn openai(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            openai_api_key: Some(api_key.into()),
            openai_url: base_url.into(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }
}

/// One system + user exchange.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmConfig,
    client: Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, client }
    }

    pub fn describe(&self) -> String {
        match self.config.provider {
            LlmProvider::OpenAI => format!(
                "OpenAI ({}) model={}",
                self.config.openai_url, self.config.model
            ),
            LlmProvider::Ollama => format!(
                "Ollama ({}) model={}",
                self.config.ollama_url, self.config.model
            ),
        }
    }

    pub async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let content = match self.config.provider {
            LlmProvider::OpenAI => self.call_openai(prompt).await?,
            LlmProvider::Ollama => self.call_ollama(prompt).await?,
        };
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(trimmed.to_string())
    }

    async fn call_openai(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let api_key = self
            .config
            .openai_api_key
            .as_ref()
            .ok_or(LlmError::MissingApiKey)?;
        let url = format!("{}/chat/completions", self.config.openai_url.trim_end_matches('/'));

        let request = OpenAIChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                OpenAIChatMessage {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                OpenAIChatMessage {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            max_completion_tokens: prompt.max_tokens,
            temperature: prompt.temperature,
        };

        debug!("Calling OpenAI: {} with model {}", url, self.config.model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                provider: "OpenAI",
                status,
                body,
            });
        }

        let openai_response: OpenAIChatResponse = response.json().await?;
        Ok(openai_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default())
    }

    async fn call_ollama(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.config.ollama_url.trim_end_matches('/'));

        let request = OllamaGenerateRequest {
            model: self.config.model.clone(),
            prompt: prompt.user.clone(),
            system: Some(prompt.system.clone()),
            stream: false,
            options: OllamaOptions {
                temperature: prompt.temperature,
                num_predict: prompt.max_tokens,
            },
        };

        debug!("Calling Ollama: {} with model {}", url, self.config.model);

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                provider: "Ollama",
                status,
                body,
            });
        }

        let ollama_response: OllamaGenerateResponse = response.json().await?;
        debug!(
            "Ollama response received in {:?}",
            Duration::from_nanos(ollama_response.total_duration.unwrap_or(0))
        );
        Ok(ollama_response.response)
    }
}

/// Strips a Markdown code fence the model may wrap around JSON output.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|ch: char| ch.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ============================================================================
// OpenAI API types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIChatMessage>,
    max_completion_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChatChoice {
    message: OpenAIChatMessage,
}

// ============================================================================
// Ollama API types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    total_duration: Option<u64>,
}
