use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::llm::{strip_code_fence, LlmClient, Prompt};
use crate::store::MailStore;

use super::context::{load_knowledge, render_knowledge, ThreadContext};
use super::settings::load_settings;
use super::PipelineError;

const MAX_SMART_REPLIES: usize = 3;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeRequest {
    pub thread_id: Option<String>,
    #[serde(default)]
    pub instructions: String,
    pub tone: Option<String>,
}

/// Summaries, smart replies and drafts. Each call reads the merged settings
/// first and returns an empty result when its feature is switched off.
#[derive(Clone)]
pub struct ComposePipeline {
    store: Arc<dyn MailStore>,
    llm: LlmClient,
}

impl ComposePipeline {
    pub fn new(store: Arc<dyn MailStore>, llm: LlmClient) -> Self {
        Self { store, llm }
    }

    pub async fn summarize(&self, thread_id: &str) -> Result<Option<String>, PipelineError> {
        let settings = load_settings(&self.store).await?;
        let context = ThreadContext::load(&self.store, thread_id, &settings).await?;
        if !settings.generate_summaries {
            return Ok(None);
        }
        if context.emails.len() < 2 {
            debug!(
                "[ai/summarize] thread {} has {} email(s); no summary",
                thread_id,
                context.emails.len()
            );
            return Ok(None);
        }

        let prompt = Prompt {
            system: "You summarize email threads in two to four sentences. \
                     Mention open questions and who is waiting on whom."
                .to_string(),
            user: format!(
                "Subject: {}\n\n{}",
                context.thread.subject,
                context.render_history()
            ),
            max_tokens: 300,
            temperature: 0.3,
        };
        let summary = self.llm.complete(&prompt).await?;
        info!("[ai/summarize] summarized thread {}", thread_id);
        Ok(Some(summary))
    }

    pub async fn smart_replies(&self, thread_id: &str) -> Result<Vec<String>, PipelineError> {
        let settings = load_settings(&self.store).await?;
        let context = ThreadContext::load(&self.store, thread_id, &settings).await?;
        if !settings.generate_smart_replies || context.emails.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = Prompt {
            system: format!(
                "You suggest up to three short replies to the latest email in a \
                 thread. Keep each under 20 words with a {} tone. Answer with a \
                 JSON array of strings only.",
                settings.reply_tone
            ),
            user: with_knowledge(&context.render_knowledge(), &context.render_history()),
            max_tokens: 200,
            temperature: 0.7,
        };
        let raw = self.llm.complete(&prompt).await?;
        Ok(parse_replies(&raw))
    }

    pub async fn compose(&self, request: &ComposeRequest) -> Result<Option<String>, PipelineError> {
        let instructions = request.instructions.trim();
        if instructions.is_empty() {
            return Err(PipelineError::Invalid("instructions are required".to_string()));
        }
        let settings = load_settings(&self.store).await?;
        if !settings.compose_assist {
            return Ok(None);
        }
        let tone = request
            .tone
            .as_deref()
            .map(str::trim)
            .filter(|tone| !tone.is_empty())
            .unwrap_or(&settings.reply_tone)
            .to_string();

        let (history, knowledge) = match &request.thread_id {
            Some(thread_id) => {
                let context = ThreadContext::load(&self.store, thread_id, &settings).await?;
                (context.render_history(), context.render_knowledge())
            }
            None => {
                let entries = load_knowledge(&self.store, &settings).await?;
                (String::new(), render_knowledge(&entries))
            }
        };

        let mut user = String::new();
        if !history.is_empty() {
            user.push_str("Thread so far:\n");
            user.push_str(&history);
            user.push('\n');
        }
        user.push_str("Instructions: ");
        user.push_str(instructions);

        let prompt = Prompt {
            system: format!(
                "You draft email replies for a shared inbox. Write in a {tone} tone. \
                 Return only the email body, without a subject line."
            ),
            user: with_knowledge(&knowledge, &user),
            max_tokens: 800,
            temperature: 0.6,
        };
        let draft = self.llm.complete(&prompt).await?;
        info!("[ai/compose] drafted reply ({} chars)", draft.len());
        Ok(Some(draft))
    }
}

fn with_knowledge(knowledge: &str, body: &str) -> String {
    if knowledge.is_empty() {
        return body.to_string();
    }
    format!("Organization facts:\n{knowledge}\n{body}")
}

/// JSON array of strings, or one suggestion per line when the model ignores
/// the format.
fn parse_replies(raw: &str) -> Vec<String> {
    let body = strip_code_fence(raw);
    let replies = match serde_json::from_str::<Vec<String>>(body) {
        Ok(replies) => replies,
        Err(_) => body
            .lines()
            .map(|line| {
                line.trim()
                    .trim_start_matches(|ch: char| {
                        ch.is_ascii_digit() || matches!(ch, '-' | '*' | '.' | ')')
                    })
                    .trim()
                    .trim_matches('"')
                    .to_string()
            })
            .collect(),
    };
    replies
        .into_iter()
        .map(|reply| reply.trim().to_string())
        .filter(|reply| !reply.is_empty())
        .take(MAX_SMART_REPLIES)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_from_json_array_are_capped() {
        let raw = r#"["Thanks!", "Will do.", "On it.", "Sure thing."]"#;
        assert_eq!(parse_replies(raw), vec!["Thanks!", "Will do.", "On it."]);
    }

    #[test]
    fn replies_fall_back_to_lines() {
        let raw = "1. Sounds good\n- \"Let me check\"\n\n";
        assert_eq!(parse_replies(raw), vec!["Sounds good", "Let me check"]);
    }

    #[test]
    fn knowledge_is_prefixed_only_when_present() {
        assert_eq!(with_knowledge("", "body"), "body");
        assert!(with_knowledge("[tone] Voice: warm\n", "body").starts_with("Organization facts:"));
    }
}
