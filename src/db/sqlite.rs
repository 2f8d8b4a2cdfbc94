use crate::db::models::LocalProfile;
use crate::db::schema::SQLITE_INIT;
use crate::db::traits::ProfileStore;
use crate::error::AuthSyncError;
use crate::service::session_store::SessionStore;
use crate::types::Session;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::debug;

pub type SqlitePool = Pool<Sqlite>;

/// Open a pool for `database_url` and bootstrap the schema.
///
/// In-memory databases are per-connection in SQLite, so they get a single
/// connection pool.
pub async fn connect(database_url: &str) -> Result<SqlitePool, AuthSyncError> {
    let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let in_memory = database_url.contains(":memory:");
    let mut pool_opts = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
    if in_memory {
        // Closing the only connection would drop the database.
        pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
    }
    let pool = pool_opts.connect_with(connect_opts).await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Initialize the schema by executing the bundled DDL.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), AuthSyncError> {
    // sqlx::query runs one statement at a time
    for stmt in SQLITE_INIT.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(pool).await?;
    }
    Ok(())
}

const PROFILE_COLUMNS: &str = "auth_id, email, username, has_set_username, account_status, \
     account_type, metadata, created_at, updated_at";

#[derive(Clone)]
pub struct ProfileStorage {
    pool: SqlitePool,
}

impl ProfileStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn count(&self) -> Result<i64, AuthSyncError> {
        let rec: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles")
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.0)
    }

    fn row_to_model(row: SqliteRow) -> Result<LocalProfile, AuthSyncError> {
        let auth_id: String = row.try_get("auth_id")?;
        let email: String = row.try_get("email")?;
        let username: String = row.try_get("username")?;
        let has_set_username_i: i64 = row.try_get("has_set_username")?;
        let account_status: String = row.try_get("account_status")?;
        let account_type: String = row.try_get("account_type")?;
        let metadata_json: String = row.try_get("metadata")?;
        let created_at_str: String = row.try_get("created_at")?;
        let updated_at_str: String = row.try_get("updated_at")?;

        let metadata: Map<String, Value> = serde_json::from_str(&metadata_json)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(LocalProfile {
            auth_id,
            email,
            username,
            has_set_username: has_set_username_i != 0,
            account_status,
            account_type,
            metadata,
            created_at: parse_timestamp(&created_at_str)?,
            updated_at: parse_timestamp(&updated_at_str)?,
        })
    }
}

#[async_trait]
impl ProfileStore for ProfileStorage {
    async fn find_by_auth_id(&self, auth_id: &str) -> Result<Option<LocalProfile>, AuthSyncError> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE auth_id = ?"
        ))
        .bind(auth_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_model).transpose()
    }

    /// Uses SQLite `INSERT ... ON CONFLICT(auth_id) DO UPDATE`.
    async fn upsert(&self, profile: &LocalProfile) -> Result<LocalProfile, AuthSyncError> {
        let metadata_json = serde_json::to_string(&profile.metadata)?;
        let has_set_i = if profile.has_set_username { 1 } else { 0 };

        sqlx::query(&format!(
            r#"
            INSERT INTO profiles ({PROFILE_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(auth_id) DO UPDATE SET
                email=excluded.email,
                has_set_username=excluded.has_set_username,
                updated_at=excluded.updated_at
            "#
        ))
        .bind(&profile.auth_id)
        .bind(&profile.email)
        .bind(&profile.username)
        .bind(has_set_i)
        .bind(&profile.account_status)
        .bind(&profile.account_type)
        .bind(metadata_json)
        .bind(profile.created_at.to_rfc3339())
        .bind(profile.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(auth_id = %profile.auth_id, "profile upserted");

        self.find_by_auth_id(&profile.auth_id)
            .await?
            .ok_or(AuthSyncError::DatabaseError(sqlx::Error::RowNotFound))
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<LocalProfile>, AuthSyncError> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE username = ? COLLATE NOCASE LIMIT 1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_model).transpose()
    }
}

/// SQLite-backed [`SessionStore`]; one row per scope.
#[derive(Clone)]
pub struct SessionStorage {
    pool: SqlitePool,
    scope: String,
}

impl SessionStorage {
    pub fn new(pool: SqlitePool, scope: impl Into<String>) -> Self {
        Self {
            pool,
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

#[async_trait]
impl SessionStore for SessionStorage {
    async fn get(&self) -> Result<Option<Session>, AuthSyncError> {
        let row = sqlx::query(
            "SELECT access_token, refresh_token, expires_at FROM sessions WHERE scope = ?",
        )
        .bind(&self.scope)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let expires_at_str: String = row.try_get("expires_at")?;
        Ok(Some(Session {
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            expires_at: parse_timestamp(&expires_at_str)?,
        }))
    }

    // Single statement, so the tuple is replaced atomically.
    async fn set(&self, session: Session) -> Result<(), AuthSyncError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (scope, access_token, refresh_token, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(scope) DO UPDATE SET
                access_token=excluded.access_token,
                refresh_token=excluded.refresh_token,
                expires_at=excluded.expires_at
            "#,
        )
        .bind(&self.scope)
        .bind(session.access_token)
        .bind(session.refresh_token)
        .bind(session.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthSyncError> {
        sqlx::query("DELETE FROM sessions WHERE scope = ?")
            .bind(&self.scope)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, AuthSyncError> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
        .with_timezone(&Utc))
}
