pub(super) const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS mailboxes (
        id TEXT PRIMARY KEY,
        address TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS threads (
        id TEXT PRIMARY KEY,
        mailbox_id TEXT NOT NULL REFERENCES mailboxes(id) ON DELETE CASCADE,
        subject TEXT NOT NULL,
        is_read BOOLEAN NOT NULL DEFAULT false,
        is_trashed BOOLEAN NOT NULL DEFAULT false,
        is_archived BOOLEAN NOT NULL DEFAULT false,
        last_message_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS threads_mailbox_activity_idx
        ON threads (mailbox_id, last_message_at DESC)",
    "CREATE TABLE IF NOT EXISTS emails (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
        message_id TEXT,
        from_address TEXT NOT NULL,
        to_addresses TEXT[] NOT NULL DEFAULT '{}',
        subject TEXT NOT NULL,
        body_text TEXT NOT NULL,
        body_html TEXT,
        direction TEXT NOT NULL,
        sent_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS emails_thread_sent_idx ON emails (thread_id, sent_at)",
    "CREATE INDEX IF NOT EXISTS emails_message_id_idx ON emails (message_id)",
    "CREATE TABLE IF NOT EXISTS labels (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        color TEXT NOT NULL,
        sort_order INTEGER NOT NULL DEFAULT 0,
        auto_classify BOOLEAN NOT NULL DEFAULT true
    )",
    "CREATE TABLE IF NOT EXISTS thread_labels (
        thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
        label_id TEXT NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
        applied_by TEXT NOT NULL,
        confidence SMALLINT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (thread_id, label_id),
        CHECK ((applied_by = 'ai') = (confidence IS NOT NULL))
    )",
    "CREATE TABLE IF NOT EXISTS classification_rules (
        id TEXT PRIMARY KEY,
        label_id TEXT NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
        criteria TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT true,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS classification_rules_one_active_idx
        ON classification_rules (label_id) WHERE is_active",
    "CREATE TABLE IF NOT EXISTS knowledge_entries (
        id TEXT PRIMARY KEY,
        category TEXT NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT true,
        is_editable BOOLEAN NOT NULL DEFAULT true,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS ai_settings (
        key TEXT PRIMARY KEY,
        value_json TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_email TEXT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )",
];

pub(super) const AI_SETTINGS_KEY: &str = "ai_config";
