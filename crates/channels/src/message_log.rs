use async_trait::async_trait;

use crate::Result;

/// A single logged inbound message.
#[derive(Debug, Clone)]
pub struct MessageLogEntry {
    pub id: i64,
    pub channel: String,
    pub account_id: String,
    pub peer_id: String,
    pub sender_name: Option<String>,
    /// Transport message id, used for dedup.
    pub external_id: String,
    pub subject: Option<String>,
    pub body: String,
    pub access_granted: bool,
    pub created_at: i64,
}

/// Summary of a unique sender across logged messages.
#[derive(Debug, Clone)]
pub struct SenderSummary {
    pub peer_id: String,
    pub sender_name: Option<String>,
    pub message_count: i64,
    pub last_seen: i64,
    pub last_access_granted: bool,
}

/// Persistent log of every inbound message, admitted or not.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn log(&self, entry: MessageLogEntry) -> Result<()>;
    async fn list_by_account(
        &self,
        channel: &str,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<MessageLogEntry>>;
    async fn unique_senders(&self, channel: &str, account_id: &str) -> Result<Vec<SenderSummary>>;
}
