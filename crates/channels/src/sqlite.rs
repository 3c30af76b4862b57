//! SQLite backends for pairing requests, the allow-list and the message log.

use {
    async_trait::async_trait,
    sqlx::{SqlitePool, sqlite::SqliteQueryResult},
    switchboard_common::time::now_ms,
};

use crate::{
    Error, Result,
    gating::SenderId,
    message_log::{MessageLog, MessageLogEntry, SenderSummary},
    store::{
        AllowListStore, PairingMeta, PairingRequest, PairingStatus, PairingStore, UpsertResult,
    },
};

#[derive(sqlx::FromRow)]
struct PairingRow {
    channel: String,
    sender_id: String,
    account_id: String,
    code: String,
    display_name: Option<String>,
    reply_to: Option<String>,
    status: String,
    created_at: i64,
    approved_at: Option<i64>,
    notified: bool,
    reply_sent: bool,
}

impl From<PairingRow> for PairingRequest {
    fn from(r: PairingRow) -> Self {
        Self {
            channel: r.channel,
            sender_id: r.sender_id,
            account_id: r.account_id,
            code: r.code,
            display_name: r.display_name,
            reply_to: r.reply_to,
            status: PairingStatus::parse(&r.status),
            created_at: r.created_at,
            approved_at: r.approved_at,
            notified: r.notified,
            reply_sent: r.reply_sent,
        }
    }
}

/// SQLite-backed pairing and allow-list store.
pub struct SqlitePairingStore {
    pool: SqlitePool,
}

impl SqlitePairingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the pairing tables.
    ///
    /// Schema is normally managed by [`crate::run_migrations`]; this is kept
    /// for tests that use in-memory databases.
    #[doc(hidden)]
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(include_str!("../migrations/20260101000001_pairing.sql"))
            .execute(pool)
            .await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl AllowListStore for SqlitePairingStore {
    async fn read(&self, channel: &str) -> Result<Vec<String>> {
        let list = sqlx::query_scalar::<_, String>(
            "SELECT sender_id FROM allow_from WHERE channel = ? ORDER BY created_at, rowid",
        )
        .bind(channel)
        .fetch_all(&self.pool)
        .await?;
        Ok(list)
    }

    async fn add(&self, channel: &str, sender: &SenderId) -> Result<bool> {
        let res: SqliteQueryResult = sqlx::query(
            "INSERT INTO allow_from (channel, sender_id, created_at) VALUES (?, ?, ?)
             ON CONFLICT(channel, sender_id) DO NOTHING",
        )
        .bind(channel)
        .bind(sender.as_str())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }
}

#[async_trait]
impl PairingStore for SqlitePairingStore {
    async fn upsert(
        &self,
        channel: &str,
        sender: &SenderId,
        meta: PairingMeta,
        candidate_code: &str,
    ) -> Result<UpsertResult> {
        let inserted = sqlx::query(
            r#"INSERT INTO pairing_requests
                 (channel, sender_id, account_id, code, display_name, reply_to, status, created_at)
               VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
               ON CONFLICT(channel, sender_id) DO NOTHING"#,
        )
        .bind(channel)
        .bind(sender.as_str())
        .bind(&meta.account_id)
        .bind(candidate_code.to_uppercase())
        .bind(&meta.display_name)
        .bind(&meta.reply_to)
        .bind(now_ms())
        .execute(&self.pool)
        .await;

        let created = match inserted {
            Ok(res) => res.rows_affected() == 1,
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::CodeCollision {
                    channel: channel.to_string(),
                });
            },
            Err(e) => return Err(e.into()),
        };

        let (code, status, reply_sent) = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT code, status, reply_sent FROM pairing_requests
             WHERE channel = ? AND sender_id = ?",
        )
        .bind(channel)
        .bind(sender.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(UpsertResult {
            code,
            created,
            status: PairingStatus::parse(&status),
            reply_sent,
        })
    }

    async fn get(&self, channel: &str, sender: &SenderId) -> Result<Option<PairingRequest>> {
        let row = sqlx::query_as::<_, PairingRow>(
            "SELECT * FROM pairing_requests WHERE channel = ? AND sender_id = ?",
        )
        .bind(channel)
        .bind(sender.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_by_code(&self, channel: &str, code: &str) -> Result<Option<PairingRequest>> {
        let row = sqlx::query_as::<_, PairingRow>(
            "SELECT * FROM pairing_requests
             WHERE channel = ? AND code = ? AND status = 'pending'",
        )
        .bind(channel)
        .bind(code.trim().to_uppercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_pending(&self, channel: &str) -> Result<Vec<PairingRequest>> {
        let rows = sqlx::query_as::<_, PairingRow>(
            "SELECT * FROM pairing_requests
             WHERE channel = ? AND status = 'pending'
             ORDER BY created_at",
        )
        .bind(channel)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn approve(&self, channel: &str, sender: &SenderId) -> Result<Option<PairingRequest>> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE pairing_requests SET status = 'approved', approved_at = ?, notified = 0
             WHERE channel = ? AND sender_id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(channel)
        .bind(sender.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            "INSERT INTO allow_from (channel, sender_id, created_at) VALUES (?, ?, ?)
             ON CONFLICT(channel, sender_id) DO NOTHING",
        )
        .bind(channel)
        .bind(sender.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, PairingRow>(
            "SELECT * FROM pairing_requests WHERE channel = ? AND sender_id = ?",
        )
        .bind(channel)
        .bind(sender.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row.into()))
    }

    async fn reject(&self, channel: &str, sender: &SenderId) -> Result<bool> {
        let res = sqlx::query(
            "DELETE FROM pairing_requests
             WHERE channel = ? AND sender_id = ? AND status = 'pending'",
        )
        .bind(channel)
        .bind(sender.as_str())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn unnotified_approvals(&self, channel: &str) -> Result<Vec<PairingRequest>> {
        let rows = sqlx::query_as::<_, PairingRow>(
            "SELECT * FROM pairing_requests
             WHERE channel = ? AND status = 'approved' AND notified = 0
             ORDER BY approved_at",
        )
        .bind(channel)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_notified(&self, channel: &str, sender: &SenderId) -> Result<()> {
        sqlx::query("UPDATE pairing_requests SET notified = 1 WHERE channel = ? AND sender_id = ?")
            .bind(channel)
            .bind(sender.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_reply_sent(&self, channel: &str, sender: &SenderId) -> Result<()> {
        sqlx::query(
            "UPDATE pairing_requests SET reply_sent = 1 WHERE channel = ? AND sender_id = ?",
        )
        .bind(channel)
        .bind(sender.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// SQLite-backed message log.
pub struct SqliteMessageLog {
    pool: SqlitePool,
}

impl SqliteMessageLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[doc(hidden)]
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(include_str!("../migrations/20260101000002_message_log.sql"))
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct MessageLogRow {
    id: i64,
    channel: String,
    account_id: String,
    peer_id: String,
    sender_name: Option<String>,
    external_id: String,
    subject: Option<String>,
    body: String,
    access_granted: bool,
    created_at: i64,
}

impl From<MessageLogRow> for MessageLogEntry {
    fn from(r: MessageLogRow) -> Self {
        Self {
            id: r.id,
            channel: r.channel,
            account_id: r.account_id,
            peer_id: r.peer_id,
            sender_name: r.sender_name,
            external_id: r.external_id,
            subject: r.subject,
            body: r.body,
            access_granted: r.access_granted,
            created_at: r.created_at,
        }
    }
}

#[async_trait]
impl MessageLog for SqliteMessageLog {
    async fn log(&self, entry: MessageLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO message_log
             (channel, account_id, peer_id, sender_name, external_id,
              subject, body, access_granted, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.channel)
        .bind(&entry.account_id)
        .bind(&entry.peer_id)
        .bind(&entry.sender_name)
        .bind(&entry.external_id)
        .bind(&entry.subject)
        .bind(&entry.body)
        .bind(entry.access_granted)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_account(
        &self,
        channel: &str,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageLogEntry>> {
        let rows = sqlx::query_as::<_, MessageLogRow>(
            "SELECT id, channel, account_id, peer_id, sender_name, external_id,
                    subject, body, access_granted, created_at
             FROM message_log
             WHERE channel = ? AND account_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(channel)
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn unique_senders(&self, channel: &str, account_id: &str) -> Result<Vec<SenderSummary>> {
        let rows = sqlx::query_as::<_, (String, Option<String>, i64, i64, bool)>(
            "SELECT peer_id, MAX(sender_name),
                    COUNT(*) AS message_count,
                    MAX(created_at) AS last_seen,
                    MAX(CASE WHEN access_granted THEN 1 ELSE 0 END) AS last_access_granted
             FROM message_log
             WHERE channel = ? AND account_id = ?
             GROUP BY peer_id
             ORDER BY last_seen DESC",
        )
        .bind(channel)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SenderSummary {
                peer_id: r.0,
                sender_name: r.1,
                message_count: r.2,
                last_seen: r.3,
                last_access_granted: r.4,
            })
            .collect())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {super::*, sqlx::sqlite::SqlitePoolOptions};

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqlitePairingStore::init(&pool).await.unwrap();
        SqliteMessageLog::init(&pool).await.unwrap();
        pool
    }

    fn sender(raw: &str) -> SenderId {
        SenderId::parse(raw).unwrap()
    }

    fn meta() -> PairingMeta {
        PairingMeta {
            account_id: "work".into(),
            display_name: Some("New Person".into()),
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn upsert_creates_once() {
        let store = SqlitePairingStore::new(test_pool().await);
        let s = sender("new@x.com");

        let first = store.upsert("email", &s, meta(), "abcd2345").await.unwrap();
        assert!(first.created);
        assert_eq!(first.code, "ABCD2345");

        let again = store.upsert("email", &s, meta(), "WXYZ6789").await.unwrap();
        assert!(!again.created);
        assert_eq!(again.code, "ABCD2345");
        assert_eq!(again.status, PairingStatus::Pending);

        let pending = store.list_pending("email").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].display_name.as_deref(), Some("New Person"));
    }

    #[tokio::test]
    async fn reply_sent_flag_persists() {
        let store = SqlitePairingStore::new(test_pool().await);
        let s = sender("new@x.com");
        assert!(!store.upsert("email", &s, meta(), "ABCD2345").await.unwrap().reply_sent);

        store.mark_reply_sent("email", &s).await.unwrap();
        let again = store.upsert("email", &s, meta(), "WXYZ6789").await.unwrap();
        assert!(!again.created);
        assert!(again.reply_sent);
        assert!(store.get("email", &s).await.unwrap().unwrap().reply_sent);
    }

    #[tokio::test]
    async fn code_collision_is_reported() {
        let store = SqlitePairingStore::new(test_pool().await);
        store.upsert("email", &sender("a@x.com"), meta(), "SAME2345").await.unwrap();
        let err = store
            .upsert("email", &sender("b@x.com"), meta(), "SAME2345")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CodeCollision { .. }), "{err}");
    }

    #[tokio::test]
    async fn approve_is_atomic_with_allow_list() {
        let store = SqlitePairingStore::new(test_pool().await);
        let s = sender("new@x.com");
        store.upsert("email", &s, meta(), "ABCD2345").await.unwrap();

        let req = store.find_by_code("email", "abcd2345").await.unwrap().unwrap();
        assert_eq!(req.sender_id, "new@x.com");

        let approved = store.approve("email", &s).await.unwrap().unwrap();
        assert_eq!(approved.status, PairingStatus::Approved);
        assert!(approved.approved_at.is_some());
        assert_eq!(store.read("email").await.unwrap(), vec!["new@x.com"]);
        assert!(store.approve("email", &s).await.unwrap().is_none());

        // Subsequent upserts report the approval instead of a fresh code.
        let again = store.upsert("email", &s, meta(), "WXYZ6789").await.unwrap();
        assert!(!again.created);
        assert_eq!(again.status, PairingStatus::Approved);
    }

    #[tokio::test]
    async fn notice_outbox() {
        let store = SqlitePairingStore::new(test_pool().await);
        let s = sender("new@x.com");
        store.upsert("email", &s, meta(), "ABCD2345").await.unwrap();
        store.approve("email", &s).await.unwrap();

        assert_eq!(store.unnotified_approvals("email").await.unwrap().len(), 1);
        store.mark_notified("email", &s).await.unwrap();
        assert!(store.unnotified_approvals("email").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reject_removes_pending() {
        let store = SqlitePairingStore::new(test_pool().await);
        let s = sender("new@x.com");
        store.upsert("email", &s, meta(), "ABCD2345").await.unwrap();
        assert!(store.reject("email", &s).await.unwrap());
        assert!(store.get("email", &s).await.unwrap().is_none());
        assert!(!store.reject("email", &s).await.unwrap());
    }

    #[tokio::test]
    async fn allow_list_add_and_read() {
        let store = SqlitePairingStore::new(test_pool().await);
        assert!(store.add("email", &sender("a@x.com")).await.unwrap());
        assert!(!store.add("email", &sender("A@x.com ")).await.unwrap());
        assert!(store.add("email", &sender("b@x.com")).await.unwrap());
        assert_eq!(store.read("email").await.unwrap(), vec!["a@x.com", "b@x.com"]);
        assert!(store.read("chat").await.unwrap().is_empty());
    }

    fn entry(peer: &str, granted: bool, at: i64) -> MessageLogEntry {
        MessageLogEntry {
            id: 0,
            channel: "email".into(),
            account_id: "work".into(),
            peer_id: peer.into(),
            sender_name: None,
            external_id: format!("<{at}@mail>"),
            subject: Some("hello".into()),
            body: "hi".into(),
            access_granted: granted,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn message_log_roundtrip_and_summary() {
        let log = SqliteMessageLog::new(test_pool().await);
        log.log(entry("a@x.com", false, 1)).await.unwrap();
        log.log(entry("a@x.com", true, 2)).await.unwrap();
        log.log(entry("b@x.com", false, 3)).await.unwrap();

        let recent = log.list_by_account("email", "work", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].peer_id, "b@x.com");
        assert_eq!(recent[0].subject.as_deref(), Some("hello"));

        let senders = log.unique_senders("email", "work").await.unwrap();
        assert_eq!(senders.len(), 2);
        let a = senders.iter().find(|s| s.peer_id == "a@x.com").unwrap();
        assert_eq!(a.message_count, 2);
        assert!(a.last_access_granted);
    }
}
