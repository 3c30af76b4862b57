use std::fmt;

use serde::{Deserialize, Serialize};

/// Deterministic identifier for one channel conversation.
///
/// Layout: `<channel>:<account>:dm:<peer>` or, when replies are threaded,
/// `<channel>:<account>:dm:<peer>:thread:<thread>`. Channel and peer are
/// trimmed and case-folded; `:` and `%` inside a component are
/// percent-escaped so two different inputs can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Build the key for a direct conversation with `peer_id`.
    ///
    /// A blank `thread_id` is the same as none.
    pub fn for_peer(
        channel: &str,
        account_id: &str,
        peer_id: &str,
        thread_id: Option<&str>,
    ) -> Self {
        let channel = escape(&channel.trim().to_lowercase());
        let account = escape(account_id.trim());
        let peer = escape(&peer_id.trim().to_lowercase());
        let key = match thread_id.map(str::trim).filter(|t| !t.is_empty()) {
            Some(thread) => format!("{channel}:{account}:dm:{peer}:thread:{}", escape(thread)),
            None => format!("{channel}:{account}:dm:{peer}"),
        };
        Self(key)
    }

    /// Wrap an already-built key (e.g. one read back from storage).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn escape(component: &str) -> String {
    component.replace('%', "%25").replace(':', "%3A")
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0
    }
}
