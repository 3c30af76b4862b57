use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::{Result, key::SessionKey};

/// Metadata kept per channel conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_key: SessionKey,
    pub channel: String,
    pub account_id: String,
    pub agent_id: String,
    pub peer_id: String,
    /// Receipt time of the latest inbound message, epoch milliseconds.
    pub updated_at: i64,
    pub message_count: u32,
}

/// Persistent storage for session continuity metadata.
///
/// Implementations must keep `updated_at` monotonic: a write carrying an
/// older timestamp than the stored one leaves the timestamp untouched
/// (last write wins by receipt time, not by arrival order).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Timestamp of the previous interaction, if the session exists.
    async fn read_updated_at(&self, key: &SessionKey) -> Result<Option<i64>>;

    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>>;

    /// Record one interaction.
    ///
    /// Creates the session on first use. `message_count` in `record` is
    /// ignored; the store increments its own counter.
    async fn write(&self, record: SessionRecord) -> Result<()>;

    /// Sessions of one channel account, most recent first.
    async fn list(&self, channel: &str, account_id: &str) -> Result<Vec<SessionRecord>>;
}

/// In-memory session store, used by tests and ephemeral deployments.
#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<SessionKey, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn read_updated_at(&self, key: &SessionKey) -> Result<Option<i64>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).map(|r| r.updated_at))
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    async fn write(&self, record: SessionRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .entry(record.session_key.clone())
            .and_modify(|existing| {
                existing.agent_id.clone_from(&record.agent_id);
                existing.updated_at = existing.updated_at.max(record.updated_at);
                existing.message_count = existing.message_count.saturating_add(1);
            })
            .or_insert_with(|| SessionRecord {
                message_count: 1,
                ..record
            });
        Ok(())
    }

    async fn list(&self, channel: &str, account_id: &str) -> Result<Vec<SessionRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = records
            .values()
            .filter(|r| r.channel == channel && r.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) fn sample_record(peer: &str, updated_at: i64) -> SessionRecord {
    SessionRecord {
        session_key: SessionKey::for_peer("email", "work", peer, None),
        channel: "email".into(),
        account_id: "work".into(),
        agent_id: "main".into(),
        peer_id: peer.into(),
        updated_at,
        message_count: 0,
    }
}
