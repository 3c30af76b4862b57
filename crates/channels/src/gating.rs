//! Sender identity normalization and allow-list matching.
//!
//! Every comparison between a sender and an allow-list entry goes through
//! [`normalize_identity`], so config entries, persisted approvals and
//! inbound senders always agree on case and surrounding whitespace.

use std::fmt;

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use crate::store::AllowListStore;

/// Canonical form of a sender identity: trimmed and lowercased.
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A normalized, non-empty sender identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SenderId(String);

impl SenderId {
    /// Normalize `raw`, returning `None` when nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize_identity(raw);
        (!normalized.is_empty()).then_some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SenderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// DM access policy for a channel account.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    /// Anyone can message the agent.
    Open,
    /// Unknown senders get a pairing code for operator approval.
    #[default]
    Pairing,
    /// Only senders on the effective allow-list.
    Allowlist,
}

impl DmPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pairing => "pairing",
            Self::Allowlist => "allowlist",
        }
    }
}

impl fmt::Display for DmPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Union of the static (config) and persisted allow-lists.
///
/// Entries are normalized and deduplicated; config entries come first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveAllowList {
    entries: Vec<String>,
}

impl EffectiveAllowList {
    /// Merge the config list with the persisted list. Blank entries are dropped.
    pub fn resolve(config: &[String], store: &[String]) -> Self {
        let mut entries: Vec<String> = Vec::with_capacity(config.len() + store.len());
        for entry in config.iter().chain(store) {
            let entry = normalize_identity(entry);
            if !entry.is_empty() && !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        Self { entries }
    }

    /// Whether `sender` is admitted by this list.
    ///
    /// `*` admits everyone; other entries containing `*` are globs.
    pub fn contains(&self, sender: &SenderId) -> bool {
        let sender = sender.as_str();
        self.entries.iter().any(|entry| {
            if entry == "*" {
                true
            } else if entry.contains('*') {
                glob_match(entry, sender)
            } else {
                entry == sender
            }
        })
    }

    pub fn has_wildcard(&self) -> bool {
        self.entries.iter().any(|e| e == "*")
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read the persisted list for `channel` and merge it with `config`.
///
/// A failing store degrades to the config list alone.
pub async fn load_effective_allowlist(
    config: &[String],
    store: &dyn AllowListStore,
    channel: &str,
) -> EffectiveAllowList {
    let persisted = match store.read(channel).await {
        Ok(list) => list,
        Err(e) => {
            warn!(channel, error = %e, "allow-list store read failed, using config entries only");
            Vec::new()
        },
    };
    EffectiveAllowList::resolve(config, &persisted)
}

/// Glob matching supporting `*` as a wildcard for any sequence of chars.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        return rest.is_empty();
    };
    for part in middle.iter().filter(|p| !p.is_empty()) {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}
