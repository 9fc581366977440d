//! Persistence for mailboxes, threads, labels, rules, knowledge, settings and
//! sessions.
//!
//! `MailStore` is synchronous; async callers go through
//! `tokio::task::spawn_blocking`. Two implementations exist: Postgres for
//! deployments and an in-process store for tests and database-less
//! development runs.

mod memory;
mod postgres_store;
mod schema;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::task;

use crate::models::{
    ActiveRule, ClassificationRule, Email, EmailOrder, KnowledgeCategory, KnowledgeEntry,
    KnowledgePatch, Label, LabelApplication, LabelPatch, Mailbox, NewEmail, RulePatch, Session,
    Thread, ThreadFlagsPatch, ThreadLabel, ThreadQuery,
};

pub use memory::MemoryMailStore;
pub use postgres_store::PostgresMailStore;

pub type SettingsOverrides = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] ::postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store config error: {0}")]
    Config(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("blocking store task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone)]
pub struct NewLabel {
    pub name: String,
    pub color: String,
    pub sort_order: i32,
    pub auto_classify: bool,
}

#[derive(Debug, Clone)]
pub struct NewKnowledgeEntry {
    pub category: KnowledgeCategory,
    pub title: String,
    pub content: String,
    pub is_active: bool,
    pub is_editable: bool,
}

pub trait MailStore: Send + Sync {
    fn list_mailboxes(&self) -> Result<Vec<Mailbox>, StoreError>;
    fn get_mailbox(&self, mailbox_id: &str) -> Result<Option<Mailbox>, StoreError>;
    fn find_mailbox_by_address(&self, address: &str) -> Result<Option<Mailbox>, StoreError>;
    /// Fails with `Conflict` when the address is already registered.
    fn create_mailbox(&self, address: &str, name: &str) -> Result<Mailbox, StoreError>;

    fn create_thread(
        &self,
        mailbox_id: &str,
        subject: &str,
        at: DateTime<Utc>,
    ) -> Result<Thread, StoreError>;
    fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, StoreError>;
    /// Most recent activity first.
    fn list_threads(&self, query: &ThreadQuery) -> Result<Vec<Thread>, StoreError>;
    fn update_thread_flags(
        &self,
        thread_id: &str,
        patch: &ThreadFlagsPatch,
    ) -> Result<Option<Thread>, StoreError>;
    /// Thread owning any email whose RFC message id is in `message_ids`.
    fn find_thread_by_message_ids(
        &self,
        message_ids: &[String],
    ) -> Result<Option<String>, StoreError>;

    /// Stores the email and bumps the thread's `last_message_at`. Inbound
    /// mail also marks the thread unread and pulls it out of archive.
    fn insert_email(&self, email: NewEmail) -> Result<Email, StoreError>;
    fn list_emails(
        &self,
        thread_id: &str,
        order: EmailOrder,
        limit: Option<usize>,
    ) -> Result<Vec<Email>, StoreError>;

    fn list_labels(&self) -> Result<Vec<Label>, StoreError>;
    fn get_label(&self, label_id: &str) -> Result<Option<Label>, StoreError>;
    fn create_label(&self, label: NewLabel) -> Result<Label, StoreError>;
    fn update_label(&self, label_id: &str, patch: &LabelPatch)
        -> Result<Option<Label>, StoreError>;
    /// Also drops the label's thread associations and rules.
    fn delete_label(&self, label_id: &str) -> Result<bool, StoreError>;

    /// Returns `false` when the (thread, label) pair already exists; the
    /// existing row is left untouched. Unknown thread or label ids are a
    /// `Conflict`.
    fn apply_label(
        &self,
        thread_id: &str,
        label_id: &str,
        application: LabelApplication,
    ) -> Result<bool, StoreError>;
    fn remove_label(&self, thread_id: &str, label_id: &str) -> Result<bool, StoreError>;
    fn list_thread_labels(&self, thread_id: &str) -> Result<Vec<ThreadLabel>, StoreError>;

    fn list_rules(&self) -> Result<Vec<ClassificationRule>, StoreError>;
    /// Active rules whose label has `auto_classify` set, ordered by the
    /// label's sort order.
    fn active_rules(&self) -> Result<Vec<ActiveRule>, StoreError>;
    /// An active rule deactivates the label's other rules.
    fn create_rule(
        &self,
        label_id: &str,
        criteria: &str,
        is_active: bool,
    ) -> Result<ClassificationRule, StoreError>;
    fn update_rule(
        &self,
        rule_id: &str,
        patch: &RulePatch,
    ) -> Result<Option<ClassificationRule>, StoreError>;
    fn delete_rule(&self, rule_id: &str) -> Result<bool, StoreError>;

    fn list_knowledge(&self, active_only: bool) -> Result<Vec<KnowledgeEntry>, StoreError>;
    fn get_knowledge(&self, entry_id: &str) -> Result<Option<KnowledgeEntry>, StoreError>;
    fn create_knowledge(&self, entry: NewKnowledgeEntry) -> Result<KnowledgeEntry, StoreError>;
    fn update_knowledge(
        &self,
        entry_id: &str,
        patch: &KnowledgePatch,
    ) -> Result<Option<KnowledgeEntry>, StoreError>;
    fn delete_knowledge(&self, entry_id: &str) -> Result<bool, StoreError>;

    fn load_settings_overrides(&self) -> Result<Option<SettingsOverrides>, StoreError>;
    fn save_settings_overrides(&self, overrides: &SettingsOverrides) -> Result<(), StoreError>;

    fn create_session(&self, session: &Session) -> Result<(), StoreError>;
    fn find_session(&self, token: &str) -> Result<Option<Session>, StoreError>;
    fn delete_session(&self, token: &str) -> Result<bool, StoreError>;
}

/// Runs a store call on the blocking pool.
pub async fn with_store<T, F>(store: &Arc<dyn MailStore>, call: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn MailStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    task::spawn_blocking(move || call(store.as_ref()))
        .await
        .map_err(|err| StoreError::Join(err.to_string()))?
}

pub(crate) fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

pub(crate) fn normalize_message_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|ch| matches!(ch, '<' | '>'));
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

pub(crate) fn clamp_confidence(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// Parses an enum column stored as text.
pub(crate) fn parse_column<T: std::str::FromStr<Err = String>>(
    value: &str,
) -> Result<T, StoreError> {
    value.parse::<T>().map_err(StoreError::Corrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_normalized() {
        assert_eq!(
            normalize_message_id(" <ABC@Mail.Example> "),
            Some("abc@mail.example".to_string())
        );
        assert_eq!(normalize_message_id("<>"), None);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(clamp_confidence(-4), 0);
        assert_eq!(clamp_confidence(73), 73);
        assert_eq!(clamp_confidence(250), 100);
    }
}
