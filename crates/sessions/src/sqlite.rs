use {async_trait::async_trait, sqlx::SqlitePool, tracing::debug};

use crate::{
    Result,
    key::SessionKey,
    store::{SessionRecord, SessionStore},
};

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_key: String,
    channel: String,
    account_id: String,
    agent_id: String,
    peer_id: String,
    updated_at: i64,
    message_count: i64,
}

impl From<SessionRow> for SessionRecord {
    fn from(r: SessionRow) -> Self {
        Self {
            session_key: SessionKey::from_raw(r.session_key),
            channel: r.channel,
            account_id: r.account_id,
            agent_id: r.agent_id,
            peer_id: r.peer_id,
            updated_at: r.updated_at,
            message_count: u32::try_from(r.message_count).unwrap_or(u32::MAX),
        }
    }
}

/// SQLite-backed session store.
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `channel_sessions` table.
    ///
    /// Schema is normally managed by [`crate::run_migrations`]; this is kept
    /// for tests that use in-memory databases.
    #[doc(hidden)]
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(include_str!("../migrations/20260101000000_channel_sessions.sql"))
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn read_updated_at(&self, key: &SessionKey) -> Result<Option<i64>> {
        let ts = sqlx::query_scalar::<_, i64>(
            "SELECT updated_at FROM channel_sessions WHERE session_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(ts)
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM channel_sessions WHERE session_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn write(&self, record: SessionRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO channel_sessions
                 (session_key, channel, account_id, agent_id, peer_id, updated_at, message_count)
               VALUES (?, ?, ?, ?, ?, ?, 1)
               ON CONFLICT(session_key) DO UPDATE SET
                 agent_id = excluded.agent_id,
                 updated_at = MAX(channel_sessions.updated_at, excluded.updated_at),
                 message_count = channel_sessions.message_count + 1"#,
        )
        .bind(record.session_key.as_str())
        .bind(&record.channel)
        .bind(&record.account_id)
        .bind(&record.agent_id)
        .bind(&record.peer_id)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        debug!(session_key = %record.session_key, agent_id = %record.agent_id, "session touched");
        Ok(())
    }

    async fn list(&self, channel: &str, account_id: &str) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM channel_sessions WHERE channel = ? AND account_id = ? \
             ORDER BY updated_at DESC",
        )
        .bind(channel)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
