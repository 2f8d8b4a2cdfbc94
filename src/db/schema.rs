//! SQL DDL for initializing local storage.

/// SQLite schema with:
/// - `profiles.auth_id` UNIQUE, the upsert conflict key
/// - `profiles.metadata` JSON object serialized as text
/// - `sessions.scope` PRIMARY KEY, one session tuple per scope
/// - timestamps stored as RFC3339 text
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    auth_id TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL,
    username TEXT NOT NULL,
    has_set_username INTEGER NOT NULL DEFAULT 0,
    account_status TEXT NOT NULL DEFAULT 'active',
    account_type TEXT NOT NULL DEFAULT 'user',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_profiles_username ON profiles(username COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS sessions (
    scope TEXT PRIMARY KEY,
    access_token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;
