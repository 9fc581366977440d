//! Domain records shared by the store, the AI pipelines and the HTTP layer.
//!
//! Everything serializes as camelCase because the web client consumes these
//! shapes directly.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mailbox {
    pub id: String,
    pub address: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub mailbox_id: String,
    pub subject: String,
    pub is_read: bool,
    pub is_trashed: bool,
    pub is_archived: bool,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Partial update of a thread's user-controlled flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadFlagsPatch {
    pub is_read: Option<bool>,
    pub is_archived: Option<bool>,
    pub is_trashed: Option<bool>,
}

impl ThreadFlagsPatch {
    pub fn is_empty(&self) -> bool {
        self.is_read.is_none() && self.is_archived.is_none() && self.is_trashed.is_none()
    }

    pub fn apply(&self, thread: &mut Thread) {
        if let Some(value) = self.is_read {
            thread.is_read = value;
        }
        if let Some(value) = self.is_archived {
            thread.is_archived = value;
        }
        if let Some(value) = self.is_trashed {
            thread.is_trashed = value;
        }
    }

    /// Short description used in `thread_updated` events.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(value) = self.is_read {
            parts.push(if value { "read" } else { "unread" });
        }
        if let Some(value) = self.is_archived {
            parts.push(if value { "archived" } else { "unarchived" });
        }
        if let Some(value) = self.is_trashed {
            parts.push(if value { "trashed" } else { "restored" });
        }
        parts.join(",")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadView {
    #[default]
    Inbox,
    Archived,
    Trash,
}

impl ThreadView {
    pub fn matches(self, thread: &Thread) -> bool {
        match self {
            ThreadView::Inbox => !thread.is_archived && !thread.is_trashed,
            ThreadView::Archived => thread.is_archived && !thread.is_trashed,
            ThreadView::Trash => thread.is_trashed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThreadQuery {
    pub mailbox_id: Option<String>,
    pub view: ThreadView,
    pub label_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("unknown email direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: String,
    pub thread_id: String,
    pub message_id: Option<String>,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub direction: Direction,
    pub sent_at: DateTime<Utc>,
}

/// Email fields supplied by the caller; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewEmail {
    pub thread_id: String,
    pub message_id: Option<String>,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub direction: Direction,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailOrder {
    OldestFirst,
    NewestFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub name: String,
    pub color: String,
    pub sort_order: i32,
    pub auto_classify: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub sort_order: Option<i32>,
    pub auto_classify: Option<bool>,
}

impl LabelPatch {
    pub fn apply(&self, label: &mut Label) {
        if let Some(name) = self.name.as_ref() {
            label.name = name.clone();
        }
        if let Some(color) = self.color.as_ref() {
            label.color = color.clone();
        }
        if let Some(sort_order) = self.sort_order {
            label.sort_order = sort_order;
        }
        if let Some(auto_classify) = self.auto_classify {
            label.auto_classify = auto_classify;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppliedBy {
    User,
    Ai,
}

impl AppliedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            AppliedBy::User => "user",
            AppliedBy::Ai => "ai",
        }
    }
}

impl FromStr for AppliedBy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(AppliedBy::User),
            "ai" => Ok(AppliedBy::Ai),
            other => Err(format!("unknown label source: {other}")),
        }
    }
}

/// How a label came to be on a thread. Confidence only exists for AI
/// applications, so the `confidence iff ai` rule holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelApplication {
    User,
    Ai { confidence: u8 },
}

impl LabelApplication {
    pub fn applied_by(self) -> AppliedBy {
        match self {
            LabelApplication::User => AppliedBy::User,
            LabelApplication::Ai { .. } => AppliedBy::Ai,
        }
    }

    pub fn confidence(self) -> Option<u8> {
        match self {
            LabelApplication::User => None,
            LabelApplication::Ai { confidence } => Some(confidence),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadLabel {
    pub thread_id: String,
    pub label_id: String,
    pub applied_by: AppliedBy,
    pub confidence: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl ThreadLabel {
    pub fn new(thread_id: &str, label_id: &str, application: LabelApplication) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            label_id: label_id.to_string(),
            applied_by: application.applied_by(),
            confidence: application.confidence(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRule {
    pub id: String,
    pub label_id: String,
    pub criteria: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePatch {
    pub criteria: Option<String>,
    pub is_active: Option<bool>,
}

/// An active rule joined with the label it decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRule {
    pub rule: ClassificationRule,
    pub label: Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeCategory {
    CompanyInfo,
    Tone,
    ProductInfo,
    Other,
}

impl KnowledgeCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            KnowledgeCategory::CompanyInfo => "company_info",
            KnowledgeCategory::Tone => "tone",
            KnowledgeCategory::ProductInfo => "product_info",
            KnowledgeCategory::Other => "other",
        }
    }
}

impl FromStr for KnowledgeCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "company_info" => Ok(KnowledgeCategory::CompanyInfo),
            "tone" => Ok(KnowledgeCategory::Tone),
            "product_info" => Ok(KnowledgeCategory::ProductInfo),
            "other" => Ok(KnowledgeCategory::Other),
            other => Err(format!("unknown knowledge category: {other}")),
        }
    }
}

impl fmt::Display for KnowledgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub id: String,
    pub category: KnowledgeCategory,
    pub title: String,
    pub content: String,
    pub is_active: bool,
    pub is_editable: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePatch {
    pub category: Option<KnowledgeCategory>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub is_active: Option<bool>,
}

impl KnowledgePatch {
    pub fn apply(&self, entry: &mut KnowledgeEntry) {
        if let Some(category) = self.category {
            entry.category = category;
        }
        if let Some(title) = self.title.as_ref() {
            entry.title = title.clone();
        }
        if let Some(content) = self.content.as_ref() {
            entry.content = content.clone();
        }
        if let Some(is_active) = self.is_active {
            entry.is_active = is_active;
        }
        entry.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_email: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread() -> Thread {
        Thread {
            id: "t1".to_string(),
            mailbox_id: "m1".to_string(),
            subject: "hello".to_string(),
            is_read: false,
            is_trashed: false,
            is_archived: false,
            last_message_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn thread_label_confidence_follows_source() {
        let user = ThreadLabel::new("t1", "l1", LabelApplication::User);
        assert_eq!(user.applied_by, AppliedBy::User);
        assert_eq!(user.confidence, None);

        let ai = ThreadLabel::new("t1", "l1", LabelApplication::Ai { confidence: 82 });
        assert_eq!(ai.applied_by, AppliedBy::Ai);
        assert_eq!(ai.confidence, Some(82));
    }

    #[test]
    fn views_partition_threads() {
        let mut t = thread();
        assert!(ThreadView::Inbox.matches(&t));
        t.is_archived = true;
        assert!(!ThreadView::Inbox.matches(&t));
        assert!(ThreadView::Archived.matches(&t));
        t.is_trashed = true;
        assert!(!ThreadView::Archived.matches(&t));
        assert!(ThreadView::Trash.matches(&t));
    }

    #[test]
    fn flags_patch_applies_and_describes() {
        let mut t = thread();
        let patch = ThreadFlagsPatch {
            is_read: Some(true),
            is_archived: Some(true),
            is_trashed: None,
        };
        patch.apply(&mut t);
        assert!(t.is_read && t.is_archived && !t.is_trashed);
        assert_eq!(patch.describe(), "read,archived");
        assert!(ThreadFlagsPatch::default().is_empty());
    }

    #[test]
    fn label_source_serializes_lowercase() {
        let value = serde_json::to_value(ThreadLabel::new(
            "t1",
            "l1",
            LabelApplication::Ai { confidence: 90 },
        ))
        .unwrap();
        assert_eq!(value["appliedBy"], "ai");
        assert_eq!(value["confidence"], 90);
        assert_eq!(value["threadId"], "t1");
    }
}
