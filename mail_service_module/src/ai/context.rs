use std::fmt::Write as _;
use std::sync::Arc;

use crate::models::{Email, EmailOrder, KnowledgeEntry, Thread};
use crate::store::{with_store, MailStore};

use super::{AiSettings, PipelineError};

/// Characters of each email body passed to the model.
pub(crate) const MAX_BODY_CHARS: usize = 2000;

/// Bounded slice of a thread plus the knowledge base, oldest email first.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    pub thread: Thread,
    pub emails: Vec<Email>,
    pub knowledge: Vec<KnowledgeEntry>,
}

impl ThreadContext {
    pub async fn load(
        store: &Arc<dyn MailStore>,
        thread_id: &str,
        settings: &AiSettings,
    ) -> Result<Self, PipelineError> {
        let id = thread_id.to_string();
        let thread = with_store(store, move |store| store.get_thread(&id))
            .await?
            .ok_or_else(|| PipelineError::ThreadNotFound(thread_id.to_string()))?;

        let id = thread_id.to_string();
        let limit = settings.max_context_messages as usize;
        let mut emails = with_store(store, move |store| {
            store.list_emails(&id, EmailOrder::NewestFirst, Some(limit))
        })
        .await?;
        emails.reverse();

        let knowledge = load_knowledge(store, settings).await?;
        Ok(Self {
            thread,
            emails,
            knowledge,
        })
    }

    pub fn render_history(&self) -> String {
        let mut out = String::new();
        for email in &self.emails {
            let _ = writeln!(
                out,
                "From: {}\nTo: {}\nDate: {}\nSubject: {}\n\n{}\n---",
                email.from_address,
                email.to_addresses.join(", "),
                email.sent_at.to_rfc3339(),
                email.subject,
                truncate_chars(&email.body_text, MAX_BODY_CHARS)
            );
        }
        out
    }

    pub fn render_knowledge(&self) -> String {
        render_knowledge(&self.knowledge)
    }
}

pub(crate) async fn load_knowledge(
    store: &Arc<dyn MailStore>,
    settings: &AiSettings,
) -> Result<Vec<KnowledgeEntry>, PipelineError> {
    if !settings.use_knowledge_base {
        return Ok(Vec::new());
    }
    Ok(with_store(store, |store| store.list_knowledge(true)).await?)
}

pub(crate) fn render_knowledge(entries: &[KnowledgeEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(out, "[{}] {}: {}", entry.category, entry.title, entry.content);
    }
    out
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{Direction, NewEmail};
    use crate::store::MemoryMailStore;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 50), "short");
    }

    #[tokio::test]
    async fn keeps_the_most_recent_emails_in_chronological_order() {
        let store: Arc<dyn MailStore> = Arc::new(MemoryMailStore::new());
        let mailbox = store.create_mailbox("support@example.com", "Support").unwrap();
        let start = Utc::now() - Duration::hours(10);
        let thread = store.create_thread(&mailbox.id, "Order", start).unwrap();
        for n in 0..5 {
            store
                .insert_email(NewEmail {
                    thread_id: thread.id.clone(),
                    message_id: None,
                    from_address: "customer@example.com".to_string(),
                    to_addresses: vec![mailbox.address.clone()],
                    subject: "Order".to_string(),
                    body_text: format!("message {n}"),
                    body_html: None,
                    direction: Direction::Inbound,
                    sent_at: start + Duration::minutes(n),
                })
                .unwrap();
        }

        let settings = AiSettings {
            max_context_messages: 3,
            use_knowledge_base: false,
            ..AiSettings::default()
        };
        let context = ThreadContext::load(&store, &thread.id, &settings).await.unwrap();
        let bodies: Vec<_> = context.emails.iter().map(|e| e.body_text.as_str()).collect();
        assert_eq!(bodies, vec!["message 2", "message 3", "message 4"]);
        assert!(context.knowledge.is_empty());
    }

    #[tokio::test]
    async fn missing_thread_is_reported() {
        let store: Arc<dyn MailStore> = Arc::new(MemoryMailStore::new());
        let err = ThreadContext::load(&store, "nope", &AiSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ThreadNotFound(_)));
    }
}
