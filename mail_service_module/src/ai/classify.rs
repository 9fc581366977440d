use std::collections::HashMap;
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm::{strip_code_fence, LlmClient, Prompt};
use crate::models::{ActiveRule, Email, EmailOrder, LabelApplication};
use crate::notifications::{BusEvent, NotificationBus};
use crate::store::{clamp_confidence, with_store, MailStore};

use super::context::{truncate_chars, MAX_BODY_CHARS};
use super::PipelineError;

pub const DEFAULT_MIN_CONFIDENCE: u8 = 70;

const SYSTEM_PROMPT: &str = "You classify emails into labels. Each label has \
criteria written in plain language. Reply with JSON only, in the form \
{\"labels\":[{\"labelId\":\"<id>\",\"confidence\":<0-100>}]}. Include only \
labels whose criteria the email matches. Use only label ids from the list.";

/// Which email of the thread is classified. `Oldest` has always been the
/// behavior; `Latest` is opt-in through `CLASSIFY_MESSAGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifyTarget {
    #[default]
    Oldest,
    Latest,
}

impl FromStr for ClassifyTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "oldest" | "first" => Ok(ClassifyTarget::Oldest),
            "latest" | "newest" | "last" => Ok(ClassifyTarget::Latest),
            other => Err(format!("unknown classify target: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    pub thread_id: String,
    #[serde(default)]
    pub apply_labels: bool,
    pub min_confidence: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelCandidate {
    pub label_id: String,
    pub label_name: String,
    pub confidence: u8,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassifyOutcome {
    pub labels: Vec<LabelCandidate>,
}

#[derive(Clone)]
pub struct ClassificationPipeline {
    store: Arc<dyn MailStore>,
    llm: LlmClient,
    bus: Arc<NotificationBus>,
    target: ClassifyTarget,
}

impl ClassificationPipeline {
    pub fn new(
        store: Arc<dyn MailStore>,
        llm: LlmClient,
        bus: Arc<NotificationBus>,
        target: ClassifyTarget,
    ) -> Self {
        Self {
            store,
            llm,
            bus,
            target,
        }
    }

    pub fn describe_model(&self) -> String {
        self.llm.describe()
    }

    pub async fn classify(
        &self,
        request: &ClassifyRequest,
    ) -> Result<ClassifyOutcome, PipelineError> {
        let threshold = match request.min_confidence {
            None => DEFAULT_MIN_CONFIDENCE,
            Some(value) if (0..=100).contains(&value) => value as u8,
            Some(value) => {
                return Err(PipelineError::Invalid(format!(
                    "minConfidence must be between 0 and 100, got {value}"
                )))
            }
        };
        let thread_id = request.thread_id.clone();

        let rules = with_store(&self.store, |store| store.active_rules()).await?;
        if rules.is_empty() {
            debug!("[ai/classify] no active rules; thread {} skipped", thread_id);
            return Ok(ClassifyOutcome::default());
        }

        let id = thread_id.clone();
        let thread = with_store(&self.store, move |store| store.get_thread(&id)).await?;
        if thread.is_none() {
            return Err(PipelineError::ThreadNotFound(thread_id));
        }

        let order = match self.target {
            ClassifyTarget::Oldest => EmailOrder::OldestFirst,
            ClassifyTarget::Latest => EmailOrder::NewestFirst,
        };
        let id = thread_id.clone();
        let email = with_store(&self.store, move |store| store.list_emails(&id, order, Some(1)))
            .await?
            .into_iter()
            .next();
        let Some(email) = email else {
            debug!("[ai/classify] thread {} has no email", thread_id);
            return Ok(ClassifyOutcome::default());
        };

        let prompt = build_prompt(&email, &rules);
        let raw = self.llm.complete(&prompt).await?;
        let labels = parse_candidates(&raw, &rules)?;
        info!(
            "[ai/classify] thread {} produced {} candidate label(s)",
            thread_id,
            labels.len()
        );

        if request.apply_labels {
            self.apply(&thread_id, &labels, threshold).await?;
        }
        Ok(ClassifyOutcome { labels })
    }

    async fn apply(
        &self,
        thread_id: &str,
        labels: &[LabelCandidate],
        threshold: u8,
    ) -> Result<(), PipelineError> {
        let accepted: Vec<(String, u8)> = labels
            .iter()
            .filter(|candidate| candidate.confidence >= threshold)
            .map(|candidate| (candidate.label_id.clone(), candidate.confidence))
            .collect();
        if accepted.is_empty() {
            return Ok(());
        }
        let id = thread_id.to_string();
        let inserted = with_store(&self.store, move |store| {
            let mut inserted = 0usize;
            for (label_id, confidence) in &accepted {
                let application = LabelApplication::Ai {
                    confidence: *confidence,
                };
                if store.apply_label(&id, label_id, application)? {
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
        .await?;
        if inserted > 0 {
            info!(
                "[ai/classify] applied {} label(s) to thread {}",
                inserted, thread_id
            );
            self.bus.publish(&BusEvent::thread_updated(thread_id, "labels"));
        }
        Ok(())
    }
}

fn build_prompt(email: &Email, rules: &[ActiveRule]) -> Prompt {
    let mut user = String::from("Labels:\n");
    for active in rules {
        let _ = writeln!(
            user,
            "- id: {} | name: {} | criteria: {}",
            active.label.id, active.label.name, active.rule.criteria
        );
    }
    let _ = write!(
        user,
        "\nEmail:\nFrom: {}\nSubject: {}\n\n{}",
        email.from_address,
        email.subject,
        truncate_chars(&email.body_text, MAX_BODY_CHARS)
    );
    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
        max_tokens: 400,
        temperature: 0.0,
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAnswer {
    Wrapped { labels: Vec<RawCandidate> },
    Bare(Vec<RawCandidate>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCandidate {
    label_id: String,
    #[serde(default)]
    confidence: Value,
}

/// Parses the model answer into candidates restricted to the rule set.
/// Confidence is clamped to 0..=100 and duplicates keep the highest score.
fn parse_candidates(raw: &str, rules: &[ActiveRule]) -> Result<Vec<LabelCandidate>, PipelineError> {
    let answer: RawAnswer = serde_json::from_str(strip_code_fence(raw)).map_err(|err| {
        warn!("[ai/classify] unparseable model answer: {}", err);
        PipelineError::Llm(crate::llm::LlmError::Parse(err.to_string()))
    })?;
    let raw_candidates = match answer {
        RawAnswer::Wrapped { labels } => labels,
        RawAnswer::Bare(labels) => labels,
    };

    let names: HashMap<&str, &str> = rules
        .iter()
        .map(|active| (active.label.id.as_str(), active.label.name.as_str()))
        .collect();
    let mut best: Vec<LabelCandidate> = Vec::new();
    for candidate in raw_candidates {
        let Some(name) = names.get(candidate.label_id.as_str()) else {
            debug!("[ai/classify] dropping unknown label {}", candidate.label_id);
            continue;
        };
        let confidence = confidence_value(&candidate.confidence);
        match best.iter_mut().find(|c| c.label_id == candidate.label_id) {
            Some(existing) => existing.confidence = existing.confidence.max(confidence),
            None => best.push(LabelCandidate {
                label_id: candidate.label_id,
                label_name: name.to_string(),
                confidence,
            }),
        }
    }
    Ok(best)
}

fn confidence_value(value: &Value) -> u8 {
    let number = match value {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::String(text) => text.trim().trim_end_matches('%').parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if number.is_nan() {
        return 0;
    }
    clamp_confidence(number.round() as i64)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{ClassificationRule, Label};

    fn rule(label_id: &str, name: &str) -> ActiveRule {
        ActiveRule {
            rule: ClassificationRule {
                id: format!("rule-{label_id}"),
                label_id: label_id.to_string(),
                criteria: format!("{name} related"),
                is_active: true,
                created_at: Utc::now(),
            },
            label: Label {
                id: label_id.to_string(),
                name: name.to_string(),
                color: "#000000".to_string(),
                sort_order: 0,
                auto_classify: true,
            },
        }
    }

    #[test]
    fn target_parses_from_env_values() {
        assert_eq!("oldest".parse(), Ok(ClassifyTarget::Oldest));
        assert_eq!(" Latest ".parse(), Ok(ClassifyTarget::Latest));
        assert!("middle".parse::<ClassifyTarget>().is_err());
    }

    #[test]
    fn parses_wrapped_answer_and_filters_unknown_labels() {
        let rules = vec![rule("L1", "Billing"), rule("L2", "Support")];
        let raw = "```json\n{\"labels\":[{\"labelId\":\"L1\",\"confidence\":80},{\"labelId\":\"ghost\",\"confidence\":99}]}\n```";
        let parsed = parse_candidates(raw, &rules).unwrap();
        assert_eq!(
            parsed,
            vec![LabelCandidate {
                label_id: "L1".to_string(),
                label_name: "Billing".to_string(),
                confidence: 80,
            }]
        );
    }

    #[test]
    fn clamps_and_dedupes_bare_arrays() {
        let rules = vec![rule("L1", "Billing"), rule("L2", "Support")];
        let raw = r#"[{"labelId":"L1","confidence":150},{"labelId":"L2","confidence":-5},
            {"labelId":"L2","confidence":"42%"},{"labelId":"L1","confidence":10.6}]"#;
        let parsed = parse_candidates(raw, &rules).unwrap();
        let scores: Vec<(&str, u8)> = parsed
            .iter()
            .map(|c| (c.label_id.as_str(), c.confidence))
            .collect();
        assert_eq!(scores, vec![("L1", 100), ("L2", 42)]);
    }

    #[test]
    fn prose_answer_is_a_parse_error() {
        let rules = vec![rule("L1", "Billing")];
        assert!(matches!(
            parse_candidates("I think it is billing.", &rules),
            Err(PipelineError::Llm(_))
        ));
    }

    #[test]
    fn prompt_lists_every_rule() {
        let rules = vec![rule("L1", "Billing"), rule("L2", "Support")];
        let email = Email {
            id: "e1".to_string(),
            thread_id: "t1".to_string(),
            message_id: None,
            from_address: "a@example.com".to_string(),
            to_addresses: vec![],
            subject: "Invoice".to_string(),
            body_text: "Please send the invoice".to_string(),
            body_html: None,
            direction: crate::models::Direction::Inbound,
            sent_at: Utc::now(),
        };
        let prompt = build_prompt(&email, &rules);
        assert!(prompt.user.contains("id: L1 | name: Billing"));
        assert!(prompt.user.contains("id: L2 | name: Support"));
        assert!(prompt.user.contains("Subject: Invoice"));
    }
}
