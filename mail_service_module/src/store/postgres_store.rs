use std::time::Duration;

use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::Row;
use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::{error, info};

use crate::models::{
    new_id, ActiveRule, ClassificationRule, Direction, Email, EmailOrder, KnowledgeEntry,
    KnowledgePatch, Label, LabelApplication, LabelPatch, Mailbox, NewEmail, RulePatch, Session,
    Thread, ThreadFlagsPatch, ThreadLabel, ThreadQuery, ThreadView,
};

use super::schema::{AI_SETTINGS_KEY, SCHEMA_STATEMENTS};
use super::{
    clamp_confidence, normalize_address, normalize_message_id, parse_column, MailStore,
    NewKnowledgeEntry, NewLabel, SettingsOverrides, StoreError,
};

type PgPool = Pool<PostgresConnectionManager<MakeTlsConnector>>;
type PgConnection = PooledConnection<PostgresConnectionManager<MakeTlsConnector>>;

const MAILBOX_COLUMNS: &str = "id, address, name, created_at";
const THREAD_COLUMNS: &str =
    "id, mailbox_id, subject, is_read, is_trashed, is_archived, last_message_at, created_at";
const EMAIL_COLUMNS: &str = "id, thread_id, message_id, from_address, to_addresses, subject, \
                             body_text, body_html, direction, sent_at";
const LABEL_COLUMNS: &str = "id, name, color, sort_order, auto_classify";
const RULE_COLUMNS: &str = "id, label_id, criteria, is_active, created_at";
const KNOWLEDGE_COLUMNS: &str =
    "id, category, title, content, is_active, is_editable, updated_at";

#[derive(Debug)]
struct LoggingErrorHandler;

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("mail store postgres pool error: {:?}", err);
    }
}

pub struct PostgresMailStore {
    pool: Option<PgPool>,
}

impl PostgresMailStore {
    pub fn new(db_url: &str, allow_invalid_certs: bool) -> Result<Self, StoreError> {
        let config: postgres::Config = db_url.parse()?;

        let mut tls_builder = native_tls::TlsConnector::builder();
        if allow_invalid_certs {
            tls_builder.danger_accept_invalid_certs(true);
            tls_builder.danger_accept_invalid_hostnames(true);
        }
        let tls_connector = tls_builder
            .build()
            .map_err(|err| StoreError::Config(err.to_string()))?;
        let tls = MakeTlsConnector::new(tls_connector);

        let manager = PostgresConnectionManager::new(config, tls);
        let pool = Pool::builder()
            .max_size(16)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(5))
            .idle_timeout(Some(Duration::from_secs(300)))
            .error_handler(Box::new(LoggingErrorHandler))
            .build(manager)?;

        let store = Self { pool: Some(pool) };
        store.ensure_schema()?;
        info!("mail store connected to postgres");
        Ok(store)
    }

    fn conn(&self) -> Result<PgConnection, StoreError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| StoreError::Config("mail store pool dropped".to_string()))?;
        Ok(pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        for statement in SCHEMA_STATEMENTS {
            conn.batch_execute(statement)?;
        }
        Ok(())
    }
}

impl Drop for PostgresMailStore {
    fn drop(&mut self) {
        // r2d2 joins its reaper thread on drop, which must not happen on an
        // async worker.
        if let Some(pool) = self.pool.take() {
            std::thread::spawn(move || drop(pool));
        }
    }
}

fn mailbox_from_row(row: &Row) -> Mailbox {
    Mailbox {
        id: row.get(0),
        address: row.get(1),
        name: row.get(2),
        created_at: row.get(3),
    }
}

fn thread_from_row(row: &Row) -> Thread {
    Thread {
        id: row.get(0),
        mailbox_id: row.get(1),
        subject: row.get(2),
        is_read: row.get(3),
        is_trashed: row.get(4),
        is_archived: row.get(5),
        last_message_at: row.get(6),
        created_at: row.get(7),
    }
}

fn email_from_row(row: &Row) -> Result<Email, StoreError> {
    let direction: String = row.get(8);
    Ok(Email {
        id: row.get(0),
        thread_id: row.get(1),
        message_id: row.get(2),
        from_address: row.get(3),
        to_addresses: row.get(4),
        subject: row.get(5),
        body_text: row.get(6),
        body_html: row.get(7),
        direction: parse_column::<Direction>(&direction)?,
        sent_at: row.get(9),
    })
}

fn label_from_row(row: &Row, offset: usize) -> Label {
    Label {
        id: row.get(offset),
        name: row.get(offset + 1),
        color: row.get(offset + 2),
        sort_order: row.get(offset + 3),
        auto_classify: row.get(offset + 4),
    }
}

fn rule_from_row(row: &Row) -> ClassificationRule {
    ClassificationRule {
        id: row.get(0),
        label_id: row.get(1),
        criteria: row.get(2),
        is_active: row.get(3),
        created_at: row.get(4),
    }
}

fn knowledge_from_row(row: &Row) -> Result<KnowledgeEntry, StoreError> {
    let category: String = row.get(1);
    Ok(KnowledgeEntry {
        id: row.get(0),
        category: parse_column(&category)?,
        title: row.get(2),
        content: row.get(3),
        is_active: row.get(4),
        is_editable: row.get(5),
        updated_at: row.get(6),
    })
}

fn view_clause(view: ThreadView) -> &'static str {
    match view {
        ThreadView::Inbox => "NOT is_archived AND NOT is_trashed",
        ThreadView::Archived => "is_archived AND NOT is_trashed",
        ThreadView::Trash => "is_trashed",
    }
}

impl MailStore for PostgresMailStore {
    fn list_mailboxes(&self) -> Result<Vec<Mailbox>, StoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            &format!("SELECT {MAILBOX_COLUMNS} FROM mailboxes ORDER BY address"),
            &[],
        )?;
        Ok(rows.iter().map(mailbox_from_row).collect())
    }

    fn get_mailbox(&self, mailbox_id: &str) -> Result<Option<Mailbox>, StoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            &format!("SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE id = $1"),
            &[&mailbox_id],
        )?;
        Ok(row.as_ref().map(mailbox_from_row))
    }

    fn find_mailbox_by_address(&self, address: &str) -> Result<Option<Mailbox>, StoreError> {
        let mut conn = self.conn()?;
        let address = normalize_address(address);
        let row = conn.query_opt(
            &format!("SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE address = $1"),
            &[&address],
        )?;
        Ok(row.as_ref().map(mailbox_from_row))
    }

    fn create_mailbox(&self, address: &str, name: &str) -> Result<Mailbox, StoreError> {
        let mut conn = self.conn()?;
        let address = normalize_address(address);
        let id = new_id();
        let row = conn.query_opt(
            &format!(
                "INSERT INTO mailboxes (id, address, name, created_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (address) DO NOTHING
                 RETURNING {MAILBOX_COLUMNS}"
            ),
            &[&id, &address, &name],
        )?;
        row.as_ref()
            .map(mailbox_from_row)
            .ok_or_else(|| StoreError::Conflict(format!("mailbox {} already exists", address)))
    }

    fn create_thread(
        &self,
        mailbox_id: &str,
        subject: &str,
        at: DateTime<Utc>,
    ) -> Result<Thread, StoreError> {
        let mut conn = self.conn()?;
        let id = new_id();
        let row = conn.query_one(
            &format!(
                "INSERT INTO threads (id, mailbox_id, subject, last_message_at, created_at)
                 VALUES ($1, $2, $3, $4, now())
                 RETURNING {THREAD_COLUMNS}"
            ),
            &[&id, &mailbox_id, &subject, &at],
        )?;
        Ok(thread_from_row(&row))
    }

    fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = $1"),
            &[&thread_id],
        )?;
        Ok(row.as_ref().map(thread_from_row))
    }

    fn list_threads(&self, query: &ThreadQuery) -> Result<Vec<Thread>, StoreError> {
        let mut conn = self.conn()?;
        let limit = query.limit as i64;
        let offset = query.offset as i64;
        let sql = format!(
            "SELECT {THREAD_COLUMNS} FROM threads t
             WHERE ($1::TEXT IS NULL OR t.mailbox_id = $1)
               AND ($2::TEXT IS NULL OR EXISTS (
                    SELECT 1 FROM thread_labels tl
                    WHERE tl.thread_id = t.id AND tl.label_id = $2))
               AND {view}
             ORDER BY t.last_message_at DESC, t.id
             LIMIT $3 OFFSET $4",
            view = view_clause(query.view)
        );
        let rows = conn.query(
            &sql,
            &[&query.mailbox_id, &query.label_id, &limit, &offset],
        )?;
        Ok(rows.iter().map(thread_from_row).collect())
    }

    fn update_thread_flags(
        &self,
        thread_id: &str,
        patch: &ThreadFlagsPatch,
    ) -> Result<Option<Thread>, StoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            &format!(
                "UPDATE threads SET
                    is_read = COALESCE($2, is_read),
                    is_archived = COALESCE($3, is_archived),
                    is_trashed = COALESCE($4, is_trashed)
                 WHERE id = $1
                 RETURNING {THREAD_COLUMNS}"
            ),
            &[&thread_id, &patch.is_read, &patch.is_archived, &patch.is_trashed],
        )?;
        Ok(row.as_ref().map(thread_from_row))
    }

    fn find_thread_by_message_ids(
        &self,
        message_ids: &[String],
    ) -> Result<Option<String>, StoreError> {
        let wanted: Vec<String> = message_ids
            .iter()
            .filter_map(|id| normalize_message_id(id))
            .collect();
        if wanted.is_empty() {
            return Ok(None);
        }
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT thread_id FROM emails
             WHERE message_id = ANY($1)
             ORDER BY sent_at DESC
             LIMIT 1",
            &[&wanted],
        )?;
        Ok(row.map(|row| row.get(0)))
    }

    fn insert_email(&self, email: NewEmail) -> Result<Email, StoreError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        let inbound = email.direction == Direction::Inbound;
        let updated = tx.execute(
            "UPDATE threads SET
                last_message_at = GREATEST(last_message_at, $2),
                is_read = CASE WHEN $3::BOOLEAN THEN false ELSE is_read END,
                is_archived = CASE WHEN $3::BOOLEAN THEN false ELSE is_archived END
             WHERE id = $1",
            &[&email.thread_id, &email.sent_at, &inbound],
        )?;
        if updated == 0 {
            return Err(StoreError::Conflict(format!(
                "thread {} does not exist",
                email.thread_id
            )));
        }
        let id = new_id();
        let message_id = email.message_id.as_deref().and_then(normalize_message_id);
        let row = tx.query_one(
            &format!(
                "INSERT INTO emails ({EMAIL_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 RETURNING {EMAIL_COLUMNS}"
            ),
            &[
                &id,
                &email.thread_id,
                &message_id,
                &email.from_address,
                &email.to_addresses,
                &email.subject,
                &email.body_text,
                &email.body_html,
                &email.direction.as_str(),
                &email.sent_at,
            ],
        )?;
        let stored = email_from_row(&row)?;
        tx.commit()?;
        Ok(stored)
    }

    fn list_emails(
        &self,
        thread_id: &str,
        order: EmailOrder,
        limit: Option<usize>,
    ) -> Result<Vec<Email>, StoreError> {
        let mut conn = self.conn()?;
        let direction = match order {
            EmailOrder::OldestFirst => "ASC",
            EmailOrder::NewestFirst => "DESC",
        };
        let limit = limit.map(|value| value as i64);
        let rows = conn.query(
            &format!(
                "SELECT {EMAIL_COLUMNS} FROM emails
                 WHERE thread_id = $1
                 ORDER BY sent_at {direction}, id {direction}
                 LIMIT $2"
            ),
            &[&thread_id, &limit],
        )?;
        rows.iter().map(email_from_row).collect()
    }

    fn list_labels(&self) -> Result<Vec<Label>, StoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            &format!("SELECT {LABEL_COLUMNS} FROM labels ORDER BY sort_order, name"),
            &[],
        )?;
        Ok(rows.iter().map(|row| label_from_row(row, 0)).collect())
    }

    fn get_label(&self, label_id: &str) -> Result<Option<Label>, StoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            &format!("SELECT {LABEL_COLUMNS} FROM labels WHERE id = $1"),
            &[&label_id],
        )?;
        Ok(row.as_ref().map(|row| label_from_row(row, 0)))
    }

    fn create_label(&self, label: NewLabel) -> Result<Label, StoreError> {
        let mut conn = self.conn()?;
        let id = new_id();
        let row = conn.query_one(
            &format!(
                "INSERT INTO labels ({LABEL_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING {LABEL_COLUMNS}"
            ),
            &[
                &id,
                &label.name,
                &label.color,
                &label.sort_order,
                &label.auto_classify,
            ],
        )?;
        Ok(label_from_row(&row, 0))
    }

    fn update_label(
        &self,
        label_id: &str,
        patch: &LabelPatch,
    ) -> Result<Option<Label>, StoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            &format!(
                "UPDATE labels SET
                    name = COALESCE($2, name),
                    color = COALESCE($3, color),
                    sort_order = COALESCE($4, sort_order),
                    auto_classify = COALESCE($5, auto_classify)
                 WHERE id = $1
                 RETURNING {LABEL_COLUMNS}"
            ),
            &[
                &label_id,
                &patch.name,
                &patch.color,
                &patch.sort_order,
                &patch.auto_classify,
            ],
        )?;
        Ok(row.as_ref().map(|row| label_from_row(row, 0)))
    }

    fn delete_label(&self, label_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        // thread_labels and classification_rules cascade.
        let deleted = conn.execute("DELETE FROM labels WHERE id = $1", &[&label_id])?;
        Ok(deleted > 0)
    }

    fn apply_label(
        &self,
        thread_id: &str,
        label_id: &str,
        application: LabelApplication,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let confidence = application.confidence().map(i16::from);
        let result = conn.execute(
            "INSERT INTO thread_labels (thread_id, label_id, applied_by, confidence, created_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (thread_id, label_id) DO NOTHING",
            &[
                &thread_id,
                &label_id,
                &application.applied_by().as_str(),
                &confidence,
            ],
        );
        match result {
            Ok(inserted) => Ok(inserted > 0),
            Err(err) if err.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION) => {
                Err(StoreError::Conflict(format!(
                    "thread {} or label {} does not exist",
                    thread_id, label_id
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn remove_label(&self, thread_id: &str, label_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM thread_labels WHERE thread_id = $1 AND label_id = $2",
            &[&thread_id, &label_id],
        )?;
        Ok(deleted > 0)
    }

    fn list_thread_labels(&self, thread_id: &str) -> Result<Vec<ThreadLabel>, StoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT thread_id, label_id, applied_by, confidence, created_at
             FROM thread_labels
             WHERE thread_id = $1
             ORDER BY created_at",
            &[&thread_id],
        )?;
        rows.iter()
            .map(|row| {
                let applied_by: String = row.get(2);
                let confidence: Option<i16> = row.get(3);
                Ok(ThreadLabel {
                    thread_id: row.get(0),
                    label_id: row.get(1),
                    applied_by: parse_column(&applied_by)?,
                    confidence: confidence.map(|value| clamp_confidence(i64::from(value))),
                    created_at: row.get(4),
                })
            })
            .collect()
    }

    fn list_rules(&self) -> Result<Vec<ClassificationRule>, StoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            &format!("SELECT {RULE_COLUMNS} FROM classification_rules ORDER BY created_at"),
            &[],
        )?;
        Ok(rows.iter().map(rule_from_row).collect())
    }

    fn active_rules(&self) -> Result<Vec<ActiveRule>, StoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT r.id, r.label_id, r.criteria, r.is_active, r.created_at,
                    l.id, l.name, l.color, l.sort_order, l.auto_classify
             FROM classification_rules r
             JOIN labels l ON l.id = r.label_id
             WHERE r.is_active AND l.auto_classify
             ORDER BY l.sort_order, l.name",
            &[],
        )?;
        Ok(rows
            .iter()
            .map(|row| ActiveRule {
                rule: rule_from_row(row),
                label: label_from_row(row, 5),
            })
            .collect())
    }

    fn create_rule(
        &self,
        label_id: &str,
        criteria: &str,
        is_active: bool,
    ) -> Result<ClassificationRule, StoreError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        if is_active {
            tx.execute(
                "UPDATE classification_rules SET is_active = false WHERE label_id = $1",
                &[&label_id],
            )?;
        }
        let id = new_id();
        let row = tx.query_one(
            &format!(
                "INSERT INTO classification_rules ({RULE_COLUMNS})
                 VALUES ($1, $2, $3, $4, now())
                 RETURNING {RULE_COLUMNS}"
            ),
            &[&id, &label_id, &criteria, &is_active],
        )?;
        tx.commit()?;
        Ok(rule_from_row(&row))
    }

    fn update_rule(
        &self,
        rule_id: &str,
        patch: &RulePatch,
    ) -> Result<Option<ClassificationRule>, StoreError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        if patch.is_active == Some(true) {
            tx.execute(
                "UPDATE classification_rules SET is_active = false
                 WHERE id <> $1
                   AND label_id = (SELECT label_id FROM classification_rules WHERE id = $1)",
                &[&rule_id],
            )?;
        }
        let row = tx.query_opt(
            &format!(
                "UPDATE classification_rules SET
                    criteria = COALESCE($2, criteria),
                    is_active = COALESCE($3, is_active)
                 WHERE id = $1
                 RETURNING {RULE_COLUMNS}"
            ),
            &[&rule_id, &patch.criteria, &patch.is_active],
        )?;
        tx.commit()?;
        Ok(row.as_ref().map(rule_from_row))
    }

    fn delete_rule(&self, rule_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM classification_rules WHERE id = $1",
            &[&rule_id],
        )?;
        Ok(deleted > 0)
    }

    fn list_knowledge(&self, active_only: bool) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            &format!(
                "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_entries
                 WHERE (NOT $1 OR is_active)
                 ORDER BY category, title"
            ),
            &[&active_only],
        )?;
        rows.iter().map(knowledge_from_row).collect()
    }

    fn get_knowledge(&self, entry_id: &str) -> Result<Option<KnowledgeEntry>, StoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            &format!("SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_entries WHERE id = $1"),
            &[&entry_id],
        )?;
        row.as_ref().map(knowledge_from_row).transpose()
    }

    fn create_knowledge(&self, entry: NewKnowledgeEntry) -> Result<KnowledgeEntry, StoreError> {
        let mut conn = self.conn()?;
        let id = new_id();
        let row = conn.query_one(
            &format!(
                "INSERT INTO knowledge_entries ({KNOWLEDGE_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, now())
                 RETURNING {KNOWLEDGE_COLUMNS}"
            ),
            &[
                &id,
                &entry.category.as_str(),
                &entry.title,
                &entry.content,
                &entry.is_active,
                &entry.is_editable,
            ],
        )?;
        knowledge_from_row(&row)
    }

    fn update_knowledge(
        &self,
        entry_id: &str,
        patch: &KnowledgePatch,
    ) -> Result<Option<KnowledgeEntry>, StoreError> {
        let mut conn = self.conn()?;
        let category = patch.category.map(|category| category.as_str());
        let row = conn.query_opt(
            &format!(
                "UPDATE knowledge_entries SET
                    category = COALESCE($2, category),
                    title = COALESCE($3, title),
                    content = COALESCE($4, content),
                    is_active = COALESCE($5, is_active),
                    updated_at = now()
                 WHERE id = $1
                 RETURNING {KNOWLEDGE_COLUMNS}"
            ),
            &[
                &entry_id,
                &category,
                &patch.title,
                &patch.content,
                &patch.is_active,
            ],
        )?;
        row.as_ref().map(knowledge_from_row).transpose()
    }

    fn delete_knowledge(&self, entry_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM knowledge_entries WHERE id = $1",
            &[&entry_id],
        )?;
        Ok(deleted > 0)
    }

    fn load_settings_overrides(&self) -> Result<Option<SettingsOverrides>, StoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT value_json FROM ai_settings WHERE key = $1",
            &[&AI_SETTINGS_KEY],
        )?;
        match row {
            Some(row) => {
                let raw: String = row.get(0);
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    fn save_settings_overrides(&self, overrides: &SettingsOverrides) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let raw = serde_json::to_string(overrides)?;
        conn.execute(
            "INSERT INTO ai_settings (key, value_json, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at",
            &[&AI_SETTINGS_KEY, &raw],
        )?;
        Ok(())
    }

    fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (token, user_email, expires_at) VALUES ($1, $2, $3)",
            &[&session.token, &session.user_email, &session.expires_at],
        )?;
        Ok(())
    }

    fn find_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT token, user_email, expires_at FROM sessions WHERE token = $1",
            &[&token],
        )?;
        Ok(row.map(|row| Session {
            token: row.get(0),
            user_email: row.get(1),
            expires_at: row.get(2),
        }))
    }

    fn delete_session(&self, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM sessions WHERE token = $1", &[&token])?;
        Ok(deleted > 0)
    }
}
