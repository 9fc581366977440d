use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::models::{
    new_id, ActiveRule, ClassificationRule, Direction, Email, EmailOrder, KnowledgeEntry,
    KnowledgePatch, Label, LabelApplication, LabelPatch, Mailbox, NewEmail, RulePatch, Session,
    Thread, ThreadFlagsPatch, ThreadLabel, ThreadQuery,
};

use super::{
    normalize_address, normalize_message_id, MailStore, NewKnowledgeEntry, NewLabel,
    SettingsOverrides, StoreError,
};

#[derive(Default)]
struct MemoryState {
    mailboxes: Vec<Mailbox>,
    threads: HashMap<String, Thread>,
    emails: Vec<Email>,
    labels: Vec<Label>,
    thread_labels: Vec<ThreadLabel>,
    rules: Vec<ClassificationRule>,
    knowledge: Vec<KnowledgeEntry>,
    settings: Option<SettingsOverrides>,
    sessions: HashMap<String, Session>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryMailStore {
    state: Mutex<MemoryState>,
}

impl MemoryMailStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl MailStore for MemoryMailStore {
    fn list_mailboxes(&self) -> Result<Vec<Mailbox>, StoreError> {
        let state = self.state()?;
        let mut mailboxes = state.mailboxes.clone();
        mailboxes.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(mailboxes)
    }

    fn get_mailbox(&self, mailbox_id: &str) -> Result<Option<Mailbox>, StoreError> {
        let state = self.state()?;
        Ok(state.mailboxes.iter().find(|m| m.id == mailbox_id).cloned())
    }

    fn find_mailbox_by_address(&self, address: &str) -> Result<Option<Mailbox>, StoreError> {
        let address = normalize_address(address);
        let state = self.state()?;
        Ok(state
            .mailboxes
            .iter()
            .find(|m| m.address == address)
            .cloned())
    }

    fn create_mailbox(&self, address: &str, name: &str) -> Result<Mailbox, StoreError> {
        let address = normalize_address(address);
        let mut state = self.state()?;
        if state.mailboxes.iter().any(|m| m.address == address) {
            return Err(StoreError::Conflict(format!(
                "mailbox {} already exists",
                address
            )));
        }
        let mailbox = Mailbox {
            id: new_id(),
            address,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state.mailboxes.push(mailbox.clone());
        Ok(mailbox)
    }

    fn create_thread(
        &self,
        mailbox_id: &str,
        subject: &str,
        at: DateTime<Utc>,
    ) -> Result<Thread, StoreError> {
        let thread = Thread {
            id: new_id(),
            mailbox_id: mailbox_id.to_string(),
            subject: subject.to_string(),
            is_read: false,
            is_trashed: false,
            is_archived: false,
            last_message_at: at,
            created_at: Utc::now(),
        };
        self.state()?
            .threads
            .insert(thread.id.clone(), thread.clone());
        Ok(thread)
    }

    fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        Ok(self.state()?.threads.get(thread_id).cloned())
    }

    fn list_threads(&self, query: &ThreadQuery) -> Result<Vec<Thread>, StoreError> {
        let state = self.state()?;
        let mut threads: Vec<Thread> = state
            .threads
            .values()
            .filter(|thread| query.view.matches(thread))
            .filter(|thread| {
                query
                    .mailbox_id
                    .as_deref()
                    .map_or(true, |mailbox_id| thread.mailbox_id == mailbox_id)
            })
            .filter(|thread| {
                query.label_id.as_deref().map_or(true, |label_id| {
                    state
                        .thread_labels
                        .iter()
                        .any(|tl| tl.thread_id == thread.id && tl.label_id == label_id)
                })
            })
            .cloned()
            .collect();
        threads.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(threads
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    fn update_thread_flags(
        &self,
        thread_id: &str,
        patch: &ThreadFlagsPatch,
    ) -> Result<Option<Thread>, StoreError> {
        let mut state = self.state()?;
        Ok(state.threads.get_mut(thread_id).map(|thread| {
            patch.apply(thread);
            thread.clone()
        }))
    }

    fn find_thread_by_message_ids(
        &self,
        message_ids: &[String],
    ) -> Result<Option<String>, StoreError> {
        let wanted: Vec<String> = message_ids
            .iter()
            .filter_map(|id| normalize_message_id(id))
            .collect();
        let state = self.state()?;
        Ok(state
            .emails
            .iter()
            .filter(|email| {
                email
                    .message_id
                    .as_ref()
                    .is_some_and(|id| wanted.contains(id))
            })
            .max_by_key(|email| email.sent_at)
            .map(|email| email.thread_id.clone()))
    }

    fn insert_email(&self, email: NewEmail) -> Result<Email, StoreError> {
        let mut state = self.state()?;
        let Some(thread) = state.threads.get_mut(&email.thread_id) else {
            return Err(StoreError::Conflict(format!(
                "thread {} does not exist",
                email.thread_id
            )));
        };
        if email.sent_at > thread.last_message_at {
            thread.last_message_at = email.sent_at;
        }
        if email.direction == Direction::Inbound {
            thread.is_read = false;
            thread.is_archived = false;
        }
        let stored = Email {
            id: new_id(),
            thread_id: email.thread_id,
            message_id: email.message_id.as_deref().and_then(normalize_message_id),
            from_address: email.from_address,
            to_addresses: email.to_addresses,
            subject: email.subject,
            body_text: email.body_text,
            body_html: email.body_html,
            direction: email.direction,
            sent_at: email.sent_at,
        };
        state.emails.push(stored.clone());
        Ok(stored)
    }

    fn list_emails(
        &self,
        thread_id: &str,
        order: EmailOrder,
        limit: Option<usize>,
    ) -> Result<Vec<Email>, StoreError> {
        let state = self.state()?;
        let mut emails: Vec<Email> = state
            .emails
            .iter()
            .filter(|email| email.thread_id == thread_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for identical timestamps.
        emails.sort_by_key(|email| email.sent_at);
        if order == EmailOrder::NewestFirst {
            emails.reverse();
        }
        if let Some(limit) = limit {
            emails.truncate(limit);
        }
        Ok(emails)
    }

    fn list_labels(&self) -> Result<Vec<Label>, StoreError> {
        let mut labels = self.state()?.labels.clone();
        labels.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.name.cmp(&b.name)));
        Ok(labels)
    }

    fn get_label(&self, label_id: &str) -> Result<Option<Label>, StoreError> {
        let state = self.state()?;
        Ok(state.labels.iter().find(|l| l.id == label_id).cloned())
    }

    fn create_label(&self, label: NewLabel) -> Result<Label, StoreError> {
        let label = Label {
            id: new_id(),
            name: label.name,
            color: label.color,
            sort_order: label.sort_order,
            auto_classify: label.auto_classify,
        };
        self.state()?.labels.push(label.clone());
        Ok(label)
    }

    fn update_label(
        &self,
        label_id: &str,
        patch: &LabelPatch,
    ) -> Result<Option<Label>, StoreError> {
        let mut state = self.state()?;
        Ok(state
            .labels
            .iter_mut()
            .find(|l| l.id == label_id)
            .map(|label| {
                patch.apply(label);
                label.clone()
            }))
    }

    fn delete_label(&self, label_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let before = state.labels.len();
        state.labels.retain(|l| l.id != label_id);
        if state.labels.len() == before {
            return Ok(false);
        }
        state.thread_labels.retain(|tl| tl.label_id != label_id);
        state.rules.retain(|r| r.label_id != label_id);
        Ok(true)
    }

    fn apply_label(
        &self,
        thread_id: &str,
        label_id: &str,
        application: LabelApplication,
    ) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        if !state.threads.contains_key(thread_id) {
            return Err(StoreError::Conflict(format!("thread {} does not exist", thread_id)));
        }
        if !state.labels.iter().any(|label| label.id == label_id) {
            return Err(StoreError::Conflict(format!("label {} does not exist", label_id)));
        }
        if state
            .thread_labels
            .iter()
            .any(|tl| tl.thread_id == thread_id && tl.label_id == label_id)
        {
            return Ok(false);
        }
        state
            .thread_labels
            .push(ThreadLabel::new(thread_id, label_id, application));
        Ok(true)
    }

    fn remove_label(&self, thread_id: &str, label_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let before = state.thread_labels.len();
        state
            .thread_labels
            .retain(|tl| !(tl.thread_id == thread_id && tl.label_id == label_id));
        Ok(state.thread_labels.len() != before)
    }

    fn list_thread_labels(&self, thread_id: &str) -> Result<Vec<ThreadLabel>, StoreError> {
        let state = self.state()?;
        Ok(state
            .thread_labels
            .iter()
            .filter(|tl| tl.thread_id == thread_id)
            .cloned()
            .collect())
    }

    fn list_rules(&self) -> Result<Vec<ClassificationRule>, StoreError> {
        let mut rules = self.state()?.rules.clone();
        rules.sort_by_key(|rule| rule.created_at);
        Ok(rules)
    }

    fn active_rules(&self) -> Result<Vec<ActiveRule>, StoreError> {
        let state = self.state()?;
        let mut active: Vec<ActiveRule> = state
            .rules
            .iter()
            .filter(|rule| rule.is_active)
            .filter_map(|rule| {
                state
                    .labels
                    .iter()
                    .find(|label| label.id == rule.label_id && label.auto_classify)
                    .map(|label| ActiveRule {
                        rule: rule.clone(),
                        label: label.clone(),
                    })
            })
            .collect();
        active.sort_by(|a, b| {
            a.label
                .sort_order
                .cmp(&b.label.sort_order)
                .then_with(|| a.label.name.cmp(&b.label.name))
        });
        Ok(active)
    }

    fn create_rule(
        &self,
        label_id: &str,
        criteria: &str,
        is_active: bool,
    ) -> Result<ClassificationRule, StoreError> {
        let mut state = self.state()?;
        if is_active {
            for rule in state.rules.iter_mut().filter(|r| r.label_id == label_id) {
                rule.is_active = false;
            }
        }
        let rule = ClassificationRule {
            id: new_id(),
            label_id: label_id.to_string(),
            criteria: criteria.to_string(),
            is_active,
            created_at: Utc::now(),
        };
        state.rules.push(rule.clone());
        Ok(rule)
    }

    fn update_rule(
        &self,
        rule_id: &str,
        patch: &RulePatch,
    ) -> Result<Option<ClassificationRule>, StoreError> {
        let mut state = self.state()?;
        let Some(label_id) = state
            .rules
            .iter()
            .find(|r| r.id == rule_id)
            .map(|r| r.label_id.clone())
        else {
            return Ok(None);
        };
        if patch.is_active == Some(true) {
            for rule in state
                .rules
                .iter_mut()
                .filter(|r| r.label_id == label_id && r.id != rule_id)
            {
                rule.is_active = false;
            }
        }
        Ok(state
            .rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .map(|rule| {
                if let Some(criteria) = patch.criteria.as_ref() {
                    rule.criteria = criteria.clone();
                }
                if let Some(is_active) = patch.is_active {
                    rule.is_active = is_active;
                }
                rule.clone()
            }))
    }

    fn delete_rule(&self, rule_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let before = state.rules.len();
        state.rules.retain(|r| r.id != rule_id);
        Ok(state.rules.len() != before)
    }

    fn list_knowledge(&self, active_only: bool) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let state = self.state()?;
        let mut entries: Vec<KnowledgeEntry> = state
            .knowledge
            .iter()
            .filter(|entry| !active_only || entry.is_active)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.category
                .as_str()
                .cmp(b.category.as_str())
                .then_with(|| a.title.cmp(&b.title))
        });
        Ok(entries)
    }

    fn get_knowledge(&self, entry_id: &str) -> Result<Option<KnowledgeEntry>, StoreError> {
        let state = self.state()?;
        Ok(state.knowledge.iter().find(|e| e.id == entry_id).cloned())
    }

    fn create_knowledge(&self, entry: NewKnowledgeEntry) -> Result<KnowledgeEntry, StoreError> {
        let entry = KnowledgeEntry {
            id: new_id(),
            category: entry.category,
            title: entry.title,
            content: entry.content,
            is_active: entry.is_active,
            is_editable: entry.is_editable,
            updated_at: Utc::now(),
        };
        self.state()?.knowledge.push(entry.clone());
        Ok(entry)
    }

    fn update_knowledge(
        &self,
        entry_id: &str,
        patch: &KnowledgePatch,
    ) -> Result<Option<KnowledgeEntry>, StoreError> {
        let mut state = self.state()?;
        Ok(state
            .knowledge
            .iter_mut()
            .find(|e| e.id == entry_id)
            .map(|entry| {
                patch.apply(entry);
                entry.clone()
            }))
    }

    fn delete_knowledge(&self, entry_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let before = state.knowledge.len();
        state.knowledge.retain(|e| e.id != entry_id);
        Ok(state.knowledge.len() != before)
    }

    fn load_settings_overrides(&self) -> Result<Option<SettingsOverrides>, StoreError> {
        Ok(self.state()?.settings.clone())
    }

    fn save_settings_overrides(&self, overrides: &SettingsOverrides) -> Result<(), StoreError> {
        self.state()?.settings = Some(overrides.clone());
        Ok(())
    }

    fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        self.state()?
            .sessions
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    fn find_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.state()?.sessions.get(token).cloned())
    }

    fn delete_session(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.state()?.sessions.remove(token).is_some())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::{AppliedBy, ThreadView};

    fn seed_thread(store: &MemoryMailStore) -> Thread {
        let mailbox = store.create_mailbox("Team@Majumail.test", "Team").unwrap();
        store
            .create_thread(&mailbox.id, "Quarterly numbers", Utc::now())
            .unwrap()
    }

    fn label(store: &MemoryMailStore, name: &str, auto_classify: bool) -> Label {
        store
            .create_label(NewLabel {
                name: name.to_string(),
                color: "#ff0000".to_string(),
                sort_order: 0,
                auto_classify,
            })
            .unwrap()
    }

    fn inbound(thread_id: &str, message_id: &str, sent_at: DateTime<Utc>) -> NewEmail {
        NewEmail {
            thread_id: thread_id.to_string(),
            message_id: Some(message_id.to_string()),
            from_address: "alice@example.com".to_string(),
            to_addresses: vec!["team@majumail.test".to_string()],
            subject: "Quarterly numbers".to_string(),
            body_text: "see attached".to_string(),
            body_html: None,
            direction: Direction::Inbound,
            sent_at,
        }
    }

    #[test]
    fn duplicate_label_application_keeps_first_row() {
        let store = MemoryMailStore::new();
        let thread = seed_thread(&store);
        let urgent = label(&store, "Urgent", true);

        assert!(store
            .apply_label(&thread.id, &urgent.id, LabelApplication::Ai { confidence: 91 })
            .unwrap());
        assert!(!store
            .apply_label(&thread.id, &urgent.id, LabelApplication::User)
            .unwrap());

        let labels = store.list_thread_labels(&thread.id).unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].applied_by, AppliedBy::Ai);
        assert_eq!(labels[0].confidence, Some(91));
    }

    #[test]
    fn applying_unknown_thread_or_label_is_a_conflict() {
        let store = MemoryMailStore::new();
        let thread = seed_thread(&store);
        let urgent = label(&store, "Urgent", true);

        let err = store
            .apply_label("no-such-thread", &urgent.id, LabelApplication::User)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let err = store
            .apply_label(&thread.id, "no-such-label", LabelApplication::User)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.list_thread_labels(&thread.id).unwrap().is_empty());
    }

    #[test]
    fn mailbox_addresses_are_unique_and_case_insensitive() {
        let store = MemoryMailStore::new();
        store.create_mailbox("ops@majumail.test", "Ops").unwrap();
        let err = store.create_mailbox(" OPS@majumail.test", "Ops 2").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store
            .find_mailbox_by_address("Ops@MajuMail.test")
            .unwrap()
            .is_some());
    }

    #[test]
    fn inbound_email_reopens_thread_and_orders_history() {
        let store = MemoryMailStore::new();
        let thread = seed_thread(&store);
        store
            .update_thread_flags(
                &thread.id,
                &ThreadFlagsPatch {
                    is_read: Some(true),
                    is_archived: Some(true),
                    is_trashed: None,
                },
            )
            .unwrap();

        let now = Utc::now();
        store
            .insert_email(inbound(&thread.id, "<second@mail>", now))
            .unwrap();
        store
            .insert_email(inbound(&thread.id, "<first@mail>", now - Duration::hours(1)))
            .unwrap();

        let reopened = store.get_thread(&thread.id).unwrap().unwrap();
        assert!(!reopened.is_read);
        assert!(!reopened.is_archived);
        assert_eq!(reopened.last_message_at, now);

        let oldest = store
            .list_emails(&thread.id, EmailOrder::OldestFirst, Some(1))
            .unwrap();
        assert_eq!(oldest[0].message_id.as_deref(), Some("first@mail"));
        let newest = store
            .list_emails(&thread.id, EmailOrder::NewestFirst, Some(1))
            .unwrap();
        assert_eq!(newest[0].message_id.as_deref(), Some("second@mail"));

        assert_eq!(
            store
                .find_thread_by_message_ids(&["<FIRST@mail>".to_string()])
                .unwrap(),
            Some(thread.id.clone())
        );
    }

    #[test]
    fn activating_a_rule_deactivates_siblings() {
        let store = MemoryMailStore::new();
        let billing = label(&store, "Billing", true);
        let first = store
            .create_rule(&billing.id, "invoices and receipts", true)
            .unwrap();
        let second = store
            .create_rule(&billing.id, "anything about payments", true)
            .unwrap();

        let rules = store.list_rules().unwrap();
        assert!(!rules.iter().find(|r| r.id == first.id).unwrap().is_active);
        assert!(rules.iter().find(|r| r.id == second.id).unwrap().is_active);

        store
            .update_rule(
                &first.id,
                &RulePatch {
                    criteria: None,
                    is_active: Some(true),
                },
            )
            .unwrap();
        let active = store.active_rules().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].rule.id, first.id);
    }

    #[test]
    fn active_rules_skip_labels_without_auto_classify() {
        let store = MemoryMailStore::new();
        let manual = label(&store, "Manual", false);
        store.create_rule(&manual.id, "never used", true).unwrap();
        assert!(store.active_rules().unwrap().is_empty());
    }

    #[test]
    fn label_filter_and_views_apply_to_listing() {
        let store = MemoryMailStore::new();
        let thread = seed_thread(&store);
        let other = store
            .create_thread(&thread.mailbox_id, "Other", Utc::now())
            .unwrap();
        let vip = label(&store, "VIP", true);
        store
            .apply_label(&thread.id, &vip.id, LabelApplication::User)
            .unwrap();

        let query = ThreadQuery {
            label_id: Some(vip.id.clone()),
            limit: 50,
            ..ThreadQuery::default()
        };
        let listed = store.list_threads(&query).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, thread.id);

        store
            .update_thread_flags(
                &other.id,
                &ThreadFlagsPatch {
                    is_trashed: Some(true),
                    ..ThreadFlagsPatch::default()
                },
            )
            .unwrap();
        let trash = store
            .list_threads(&ThreadQuery {
                view: ThreadView::Trash,
                limit: 50,
                ..ThreadQuery::default()
            })
            .unwrap();
        assert_eq!(trash.len(), 1);
        assert_eq!(trash[0].id, other.id);
    }

    #[test]
    fn deleting_a_label_drops_associations() {
        let store = MemoryMailStore::new();
        let thread = seed_thread(&store);
        let temp = label(&store, "Temp", true);
        store
            .apply_label(&thread.id, &temp.id, LabelApplication::User)
            .unwrap();
        store.create_rule(&temp.id, "temporary", true).unwrap();

        assert!(store.delete_label(&temp.id).unwrap());
        assert!(store.list_thread_labels(&thread.id).unwrap().is_empty());
        assert!(store.list_rules().unwrap().is_empty());
        assert!(!store.delete_label(&temp.id).unwrap());
    }
}
