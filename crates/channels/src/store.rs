//! Pairing and allow-list persistence traits with an in-memory backend.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    switchboard_common::time::now_ms,
};

use crate::{Error, Result, gating::SenderId};

/// Lifecycle of a pairing request. Rejected requests are deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingStatus {
    Pending,
    Approved,
}

impl PairingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
        }
    }

    pub(crate) fn parse(raw: &str) -> Self {
        if raw == "approved" {
            Self::Approved
        } else {
            Self::Pending
        }
    }
}

/// A request by an unknown sender to be admitted on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingRequest {
    pub channel: String,
    pub sender_id: String,
    /// Account the request arrived on; approval notices go out through it.
    pub account_id: String,
    pub code: String,
    pub display_name: Option<String>,
    /// Transport address for the approval notice, when it differs from the sender.
    pub reply_to: Option<String>,
    pub status: PairingStatus,
    pub created_at: i64,
    pub approved_at: Option<i64>,
    /// Whether the sender has been told about the approval.
    pub notified: bool,
    /// Whether the pairing instructions reached the sender.
    pub reply_sent: bool,
}

/// Metadata captured when a pairing request is first created.
#[derive(Debug, Clone, Default)]
pub struct PairingMeta {
    pub account_id: String,
    pub display_name: Option<String>,
    pub reply_to: Option<String>,
}

/// Outcome of an insert-if-absent on the pairing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertResult {
    pub code: String,
    /// `true` only for the call that created the request.
    pub created: bool,
    pub status: PairingStatus,
    /// Whether the pairing instructions were delivered already.
    pub reply_sent: bool,
}

/// Persisted per-channel approvals.
#[async_trait]
pub trait AllowListStore: Send + Sync {
    /// Approved sender identities for `channel`, oldest first.
    async fn read(&self, channel: &str) -> Result<Vec<String>>;

    /// Add `sender`. Returns `false` when it was already present.
    async fn add(&self, channel: &str, sender: &SenderId) -> Result<bool>;
}

/// Persisted pairing requests keyed by `(channel, sender)`.
#[async_trait]
pub trait PairingStore: Send + Sync {
    /// Atomically create a pending request with `candidate_code` unless one
    /// already exists for `(channel, sender)`.
    ///
    /// Fails with [`Error::CodeCollision`] when `candidate_code` is already
    /// taken on the channel.
    async fn upsert(
        &self,
        channel: &str,
        sender: &SenderId,
        meta: PairingMeta,
        candidate_code: &str,
    ) -> Result<UpsertResult>;

    async fn get(&self, channel: &str, sender: &SenderId) -> Result<Option<PairingRequest>>;

    /// Pending request holding `code` (case-insensitive).
    async fn find_by_code(&self, channel: &str, code: &str) -> Result<Option<PairingRequest>>;

    async fn list_pending(&self, channel: &str) -> Result<Vec<PairingRequest>>;

    /// Mark a pending request approved and add the sender to the channel's
    /// allow-list in one step. Returns `None` when nothing was pending.
    async fn approve(&self, channel: &str, sender: &SenderId) -> Result<Option<PairingRequest>>;

    /// Delete a pending request. Returns `false` when nothing was pending.
    async fn reject(&self, channel: &str, sender: &SenderId) -> Result<bool>;

    /// Approved requests whose sender has not been notified yet.
    async fn unnotified_approvals(&self, channel: &str) -> Result<Vec<PairingRequest>>;

    async fn mark_notified(&self, channel: &str, sender: &SenderId) -> Result<()>;

    /// Record that the pairing instructions reached the sender.
    async fn mark_reply_sent(&self, channel: &str, sender: &SenderId) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    requests: HashMap<(String, String), PairingRequest>,
    allow_from: HashMap<String, Vec<String>>,
}

/// In-memory pairing and allow-list store.
#[derive(Default)]
pub struct MemoryPairingStore {
    state: Mutex<MemoryState>,
}

impl MemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn key(channel: &str, sender: &SenderId) -> (String, String) {
    (channel.to_string(), sender.as_str().to_string())
}

#[async_trait]
impl AllowListStore for MemoryPairingStore {
    async fn read(&self, channel: &str) -> Result<Vec<String>> {
        Ok(self.lock().allow_from.get(channel).cloned().unwrap_or_default())
    }

    async fn add(&self, channel: &str, sender: &SenderId) -> Result<bool> {
        let mut state = self.lock();
        let list = state.allow_from.entry(channel.to_string()).or_default();
        if list.iter().any(|s| s == sender.as_str()) {
            return Ok(false);
        }
        list.push(sender.to_string());
        Ok(true)
    }
}

#[async_trait]
impl PairingStore for MemoryPairingStore {
    async fn upsert(
        &self,
        channel: &str,
        sender: &SenderId,
        meta: PairingMeta,
        candidate_code: &str,
    ) -> Result<UpsertResult> {
        let mut state = self.lock();
        if let Some(existing) = state.requests.get(&key(channel, sender)) {
            return Ok(UpsertResult {
                code: existing.code.clone(),
                created: false,
                status: existing.status,
                reply_sent: existing.reply_sent,
            });
        }
        let code = candidate_code.to_uppercase();
        if state
            .requests
            .values()
            .any(|r| r.channel == channel && r.code == code)
        {
            return Err(Error::CodeCollision {
                channel: channel.to_string(),
            });
        }
        state.requests.insert(key(channel, sender), PairingRequest {
            channel: channel.to_string(),
            sender_id: sender.to_string(),
            account_id: meta.account_id,
            code: code.clone(),
            display_name: meta.display_name,
            reply_to: meta.reply_to,
            status: PairingStatus::Pending,
            created_at: now_ms(),
            approved_at: None,
            notified: false,
            reply_sent: false,
        });
        Ok(UpsertResult {
            code,
            created: true,
            status: PairingStatus::Pending,
            reply_sent: false,
        })
    }

    async fn get(&self, channel: &str, sender: &SenderId) -> Result<Option<PairingRequest>> {
        Ok(self.lock().requests.get(&key(channel, sender)).cloned())
    }

    async fn find_by_code(&self, channel: &str, code: &str) -> Result<Option<PairingRequest>> {
        let code = code.trim().to_uppercase();
        Ok(self
            .lock()
            .requests
            .values()
            .find(|r| r.channel == channel && r.status == PairingStatus::Pending && r.code == code)
            .cloned())
    }

    async fn list_pending(&self, channel: &str) -> Result<Vec<PairingRequest>> {
        let mut pending: Vec<PairingRequest> = self
            .lock()
            .requests
            .values()
            .filter(|r| r.channel == channel && r.status == PairingStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }

    async fn approve(&self, channel: &str, sender: &SenderId) -> Result<Option<PairingRequest>> {
        let mut state = self.lock();
        let approved = match state.requests.get_mut(&key(channel, sender)) {
            Some(req) if req.status == PairingStatus::Pending => {
                req.status = PairingStatus::Approved;
                req.approved_at = Some(now_ms());
                req.notified = false;
                req.clone()
            },
            _ => return Ok(None),
        };
        let list = state.allow_from.entry(channel.to_string()).or_default();
        if !list.iter().any(|s| s == sender.as_str()) {
            list.push(sender.to_string());
        }
        Ok(Some(approved))
    }

    async fn reject(&self, channel: &str, sender: &SenderId) -> Result<bool> {
        let mut state = self.lock();
        let k = key(channel, sender);
        if state
            .requests
            .get(&k)
            .is_some_and(|r| r.status == PairingStatus::Pending)
        {
            state.requests.remove(&k);
            return Ok(true);
        }
        Ok(false)
    }

    async fn unnotified_approvals(&self, channel: &str) -> Result<Vec<PairingRequest>> {
        let mut approved: Vec<PairingRequest> = self
            .lock()
            .requests
            .values()
            .filter(|r| r.channel == channel && r.status == PairingStatus::Approved && !r.notified)
            .cloned()
            .collect();
        approved.sort_by_key(|r| r.approved_at);
        Ok(approved)
    }

    async fn mark_notified(&self, channel: &str, sender: &SenderId) -> Result<()> {
        if let Some(req) = self.lock().requests.get_mut(&key(channel, sender)) {
            req.notified = true;
        }
        Ok(())
    }

    async fn mark_reply_sent(&self, channel: &str, sender: &SenderId) -> Result<()> {
        if let Some(req) = self.lock().requests.get_mut(&key(channel, sender)) {
            req.reply_sent = true;
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn sender(raw: &str) -> SenderId {
        SenderId::parse(raw).unwrap()
    }

    fn meta() -> PairingMeta {
        PairingMeta {
            account_id: "work".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_is_insert_if_absent() {
        let store = MemoryPairingStore::new();
        let s = sender("new@x.com");
        let first = store.upsert("email", &s, meta(), "abcd2345").await.unwrap();
        assert!(first.created);
        assert_eq!(first.code, "ABCD2345");

        let second = store.upsert("email", &s, meta(), "ZZZZ9999").await.unwrap();
        assert!(!second.created);
        assert_eq!(second.code, "ABCD2345");
    }

    #[tokio::test]
    async fn reply_sent_survives_upserts() {
        let store = MemoryPairingStore::new();
        let s = sender("new@x.com");
        assert!(!store.upsert("email", &s, meta(), "ABCD2345").await.unwrap().reply_sent);
        assert!(!store.upsert("email", &s, meta(), "ABCD2345").await.unwrap().reply_sent);

        store.mark_reply_sent("email", &s).await.unwrap();
        let again = store.upsert("email", &s, meta(), "ZZZZ9999").await.unwrap();
        assert!(again.reply_sent);
        assert!(store.get("email", &s).await.unwrap().unwrap().reply_sent);
    }

    #[tokio::test]
    async fn colliding_code_is_refused() {
        let store = MemoryPairingStore::new();
        store.upsert("email", &sender("a@x.com"), meta(), "SAME2345").await.unwrap();
        let err = store
            .upsert("email", &sender("b@x.com"), meta(), "SAME2345")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CodeCollision { .. }));
        // Same code on another channel is fine.
        assert!(store.upsert("chat", &sender("b@x.com"), meta(), "SAME2345").await.unwrap().created);
    }

    #[tokio::test]
    async fn approve_moves_sender_to_allow_list() {
        let store = MemoryPairingStore::new();
        let s = sender("new@x.com");
        store.upsert("email", &s, meta(), "ABCD2345").await.unwrap();

        let approved = store.approve("email", &s).await.unwrap().unwrap();
        assert_eq!(approved.status, PairingStatus::Approved);
        assert!(!approved.notified);
        assert_eq!(store.read("email").await.unwrap(), vec!["new@x.com"]);
        assert!(store.list_pending("email").await.unwrap().is_empty());
        assert_eq!(store.unnotified_approvals("email").await.unwrap().len(), 1);

        // A second approval is a no-op.
        assert!(store.approve("email", &s).await.unwrap().is_none());

        store.mark_notified("email", &s).await.unwrap();
        assert!(store.unnotified_approvals("email").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_by_code_is_case_insensitive_and_pending_only() {
        let store = MemoryPairingStore::new();
        let s = sender("new@x.com");
        store.upsert("email", &s, meta(), "ABCD2345").await.unwrap();
        assert!(store.find_by_code("email", " abcd2345 ").await.unwrap().is_some());
        assert!(store.find_by_code("chat", "ABCD2345").await.unwrap().is_none());

        store.approve("email", &s).await.unwrap();
        assert!(store.find_by_code("email", "ABCD2345").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reject_deletes_pending_only() {
        let store = MemoryPairingStore::new();
        let s = sender("new@x.com");
        store.upsert("email", &s, meta(), "ABCD2345").await.unwrap();
        assert!(store.reject("email", &s).await.unwrap());
        assert!(store.get("email", &s).await.unwrap().is_none());
        assert!(!store.reject("email", &s).await.unwrap());
    }

    #[tokio::test]
    async fn allow_list_add_is_idempotent() {
        let store = MemoryPairingStore::new();
        let s = sender("boss@x.com");
        assert!(store.add("email", &s).await.unwrap());
        assert!(!store.add("email", &s).await.unwrap());
        assert!(store.read("chat").await.unwrap().is_empty());
    }
}
