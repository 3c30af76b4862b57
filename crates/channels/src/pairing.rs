//! Pairing: one-time approval codes that let an operator admit unknown
//! senders.
//!
//! A sender under the `pairing` policy who is not on the effective allow-list
//! gets exactly one pending request per channel. The first message creates it
//! and triggers a single reply carrying the code; later messages reuse the
//! same request silently. Approval moves the sender into the persisted
//! allow-list, after which the next message is admitted.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use {
    async_trait::async_trait,
    rand::Rng,
    tokio::sync::OwnedMutexGuard,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    error::Context,
    gating::SenderId,
    store::{PairingMeta, PairingRequest, PairingStore, UpsertResult},
};

/// Number of characters in a pairing code.
pub const PAIRING_CODE_LEN: usize = 8;

/// 32 chars, no I/O/0/1.
const PAIRING_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const MAX_CODE_ATTEMPTS: usize = 8;

/// Generate a random pairing code.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..PAIRING_CODE_LEN)
        .map(|_| char::from(PAIRING_ALPHABET[rng.random_range(0..PAIRING_ALPHABET.len())]))
        .collect()
}

/// Text of the one-time reply sent when a pairing request is created.
pub fn build_pairing_reply(channel: &str, id_line: &str, code: &str) -> String {
    format!(
        "Switchboard: access not configured.\n\n\
         {id_line}\n\n\
         Pairing code: {code}\n\n\
         Ask the owner to approve with:\n\
         switchboard pairing approve --channel {channel} {code}"
    )
}

/// Text sent to a sender once their pairing request is approved.
pub fn build_approval_notice() -> String {
    "Switchboard: access approved. Send a message to start a conversation.".to_string()
}

/// Delivers the approval notice back to a newly admitted sender.
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn notify_approval(&self, request: &PairingRequest) -> Result<()>;
}

/// Held while a sender's pairing state is being read or changed.
pub struct SenderGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Serializes pairing operations per `(channel, sender)` on top of a
/// [`PairingStore`].
pub struct PairingRegistry {
    store: Arc<dyn PairingStore>,
    locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl PairingRegistry {
    pub fn new(store: Arc<dyn PairingStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn PairingStore> {
        &self.store
    }

    /// Wait for exclusive access to one sender's pairing state.
    pub async fn lock_sender(&self, channel: &str, sender: &SenderId) -> SenderGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Idle entries are only referenced by the map itself.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(
                locks
                    .entry((channel.to_string(), sender.to_string()))
                    .or_default(),
            )
        };
        SenderGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Create the sender's pending request, or return the existing one.
    ///
    /// Regenerates the code when it collides with another request's code.
    /// Callers that act on `created` should hold [`Self::lock_sender`].
    pub async fn upsert_pairing_request(
        &self,
        channel: &str,
        sender: &SenderId,
        meta: PairingMeta,
    ) -> Result<UpsertResult> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = generate_code();
            match self.store.upsert(channel, sender, meta.clone(), &code).await {
                Err(Error::CodeCollision { .. }) => {
                    debug!(channel, attempt, "pairing code collision, regenerating");
                },
                other => return other,
            }
        }
        Err(Error::CodeCollision {
            channel: channel.to_string(),
        })
    }

    /// Approve a pending request, adding the sender to the allow-list.
    ///
    /// When a notifier is given the sender is told right away; otherwise the
    /// notice waits in the outbox for [`Self::deliver_pending_notices`].
    pub async fn approve(
        &self,
        channel: &str,
        sender: &SenderId,
        notifier: Option<&dyn ApprovalNotifier>,
    ) -> Result<Option<PairingRequest>> {
        let approved = {
            let _guard = self.lock_sender(channel, sender).await;
            self.store.approve(channel, sender).await?
        };
        let Some(request) = approved else {
            return Ok(None);
        };
        info!(channel, sender = %sender, "pairing request approved");
        if let Some(notifier) = notifier {
            self.notify(notifier, &request).await;
        }
        Ok(Some(request))
    }

    /// Approve the pending request holding `code` (case-insensitive).
    pub async fn approve_by_code(
        &self,
        channel: &str,
        code: &str,
        notifier: Option<&dyn ApprovalNotifier>,
    ) -> Result<Option<PairingRequest>> {
        let Some(request) = self.store.find_by_code(channel, code).await? else {
            return Ok(None);
        };
        let sender = SenderId::parse(&request.sender_id)
            .with_context(|| format!("pairing request {code} has an empty sender"))?;
        self.approve(channel, &sender, notifier).await
    }

    /// Drop a pending request. The sender gets a fresh code next time.
    pub async fn reject(&self, channel: &str, sender: &SenderId) -> Result<bool> {
        let _guard = self.lock_sender(channel, sender).await;
        let removed = self.store.reject(channel, sender).await?;
        if removed {
            info!(channel, sender = %sender, "pairing request rejected");
        }
        Ok(removed)
    }

    pub async fn list_pending(&self, channel: &str) -> Result<Vec<PairingRequest>> {
        self.store.list_pending(channel).await
    }

    /// Send approval notices that have not gone out yet.
    ///
    /// Returns how many were delivered.
    pub async fn deliver_pending_notices(
        &self,
        channel: &str,
        notifier: &dyn ApprovalNotifier,
    ) -> Result<usize> {
        let mut delivered = 0;
        for request in self.store.unnotified_approvals(channel).await? {
            if self.notify(notifier, &request).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn notify(&self, notifier: &dyn ApprovalNotifier, request: &PairingRequest) -> bool {
        if let Err(e) = notifier.notify_approval(request).await {
            warn!(
                channel = %request.channel,
                sender = %request.sender_id,
                error = %e,
                "failed to send approval notice, will retry"
            );
            return false;
        }
        let Some(sender) = SenderId::parse(&request.sender_id) else {
            return false;
        };
        if let Err(e) = self.store.mark_notified(&request.channel, &sender).await {
            warn!(channel = %request.channel, sender = %sender, error = %e, "failed to mark approval notified");
        }
        true
    }
}
