//! Per-account runtime state owned by the orchestrator.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use serde::Serialize;

use crate::{config::ChannelAccountConfig, gating::SenderId, plugin::ChannelHealthSnapshot};

/// How many recent external message ids each account remembers.
pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

/// Shared account state map used by the orchestrator.
pub type AccountStateMap = Arc<RwLock<HashMap<String, Arc<AccountState>>>>;

/// Bounded set of recently seen message ids; the oldest id is evicted first.
#[derive(Debug)]
pub struct DedupCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Remember `id`. Returns `false` when it was already seen.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    /// Forget `id` so a later redelivery is processed again.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.seen.remove(id) {
            return false;
        }
        self.order.retain(|seen| seen != id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Connection and activity status of one account.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountStatus {
    pub connected: bool,
    pub last_inbound_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Everything the orchestrator keeps for one running account.
#[derive(Debug)]
pub struct AccountState {
    pub account_id: String,
    pub config: ChannelAccountConfig,
    /// The account's own identity; messages from it are ignored.
    pub self_identity: SenderId,
    status: Mutex<AccountStatus>,
    dedup: Mutex<DedupCache>,
}

impl AccountState {
    pub fn new(account_id: impl Into<String>, config: ChannelAccountConfig, self_identity: SenderId) -> Self {
        Self {
            account_id: account_id.into(),
            config,
            self_identity,
            status: Mutex::new(AccountStatus {
                connected: true,
                ..Default::default()
            }),
            dedup: Mutex::new(DedupCache::new(DEFAULT_DEDUP_CAPACITY)),
        }
    }

    /// Remember an external message id. `false` means it is a redelivery.
    pub fn first_delivery(&self, external_id: &str) -> bool {
        self.dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(external_id)
    }

    /// Undo [`Self::first_delivery`] for an event whose handling failed.
    pub fn forget_delivery(&self, external_id: &str) {
        self.dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(external_id);
    }

    pub fn status(&self) -> AccountStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn record_inbound(&self, at: i64) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.last_inbound_at = Some(status.last_inbound_at.map_or(at, |prev| prev.max(at)));
    }

    pub fn record_error(&self, error: impl Into<String>) {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_error = Some(error.into());
    }

    pub fn set_connected(&self, connected: bool) {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .connected = connected;
    }

    pub fn health(&self) -> ChannelHealthSnapshot {
        let status = self.status();
        let details = match (&status.last_error, status.last_inbound_at) {
            (Some(err), _) => Some(format!("last error: {err}")),
            (None, Some(at)) => Some(format!("last inbound at {at}")),
            (None, None) => None,
        };
        ChannelHealthSnapshot {
            connected: status.connected,
            account_id: self.account_id.clone(),
            details,
        }
    }
}
