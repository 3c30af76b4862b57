//! Session continuity: stable session keys, previous-turn timestamps and
//! the envelope handed to the agent.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::Serialize,
    switchboard_common::time::{format_elapsed, to_datetime},
    switchboard_sessions::{SessionKey, SessionRecord, SessionStore},
    tracing::{debug, warn},
};

use crate::{
    Result,
    gating::SenderId,
    plugin::{AgentRoute, AgentRouter, RoutePeer},
};

/// Reads and records per-session interaction timestamps.
///
/// Store failures never stop a dispatch: reads degrade to "first turn" and
/// writes are logged and dropped.
#[derive(Clone)]
pub struct SessionContinuity {
    store: Arc<dyn SessionStore>,
}

impl SessionContinuity {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Deterministic key for a sender, optionally scoped to a thread.
    pub fn resolve_session_key(
        channel: &str,
        account_id: &str,
        sender: &SenderId,
        thread_id: Option<&str>,
    ) -> SessionKey {
        SessionKey::for_peer(channel, account_id, sender.as_str(), thread_id)
    }

    /// Receipt time of the session's previous inbound message.
    pub async fn read_previous_timestamp(&self, key: &SessionKey) -> Option<i64> {
        match self.store.read_updated_at(key).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(session_key = %key, error = %e, "session store read failed, treating as first turn");
                None
            },
        }
    }

    /// Record an admitted inbound message against its session.
    pub async fn record_inbound(
        &self,
        route: &AgentRoute,
        channel: &str,
        account_id: &str,
        sender: &SenderId,
        received_at: i64,
    ) {
        let record = SessionRecord {
            session_key: route.session_key.clone(),
            channel: channel.to_string(),
            account_id: account_id.to_string(),
            agent_id: route.agent_id.clone(),
            peer_id: sender.to_string(),
            updated_at: received_at,
            message_count: 1,
        };
        if let Err(e) = self.store.write(record).await {
            warn!(session_key = %route.session_key, error = %e, "failed to record inbound session");
        } else {
            debug!(session_key = %route.session_key, "session recorded");
        }
    }
}

/// Routes every admitted message to the account's agent, or a default one.
pub struct DefaultAgentRouter {
    default_agent_id: String,
}

impl DefaultAgentRouter {
    pub fn new(default_agent_id: impl Into<String>) -> Self {
        Self {
            default_agent_id: default_agent_id.into(),
        }
    }
}

#[async_trait]
impl AgentRouter for DefaultAgentRouter {
    async fn resolve_route(
        &self,
        channel: &str,
        account_id: &str,
        peer: &RoutePeer<'_>,
    ) -> Result<AgentRoute> {
        let agent_id = peer
            .agent_hint
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(&self.default_agent_id)
            .to_string();
        Ok(AgentRoute {
            agent_id,
            session_key: SessionContinuity::resolve_session_key(
                channel,
                account_id,
                peer.sender,
                peer.thread_id,
            ),
        })
    }
}

/// What the agent receives for one admitted inbound message.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub channel: String,
    pub account_id: String,
    pub agent_id: String,
    pub session_key: SessionKey,
    pub from: SenderId,
    pub display_name: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub received_at: i64,
    /// Receipt time of the previous turn; `None` on the first turn.
    pub previous_at: Option<i64>,
}

impl Envelope {
    pub fn is_first_turn(&self) -> bool {
        self.previous_at.is_none()
    }

    /// `[Email Boss <boss@x.com> +3h 2026-01-01 12:00 UTC] [Subject: hi]`
    pub fn header(&self) -> String {
        let channel = capitalize(&self.channel);
        let from = match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("{name} <{}>", self.from),
            _ => self.from.to_string(),
        };
        let mut header = format!("[{channel} {from}");
        if let Some(prev) = self.previous_at {
            header.push(' ');
            header.push_str(&format_elapsed(prev, self.received_at));
        }
        header.push(' ');
        header.push_str(
            &to_datetime(self.received_at)
                .format("%Y-%m-%d %H:%M UTC")
                .to_string(),
        );
        header.push(']');
        if let Some(subject) = self.subject.as_deref().map(str::trim)
            && !subject.is_empty()
        {
            header.push_str(&format!(" [Subject: {subject}]"));
        }
        header
    }

    /// Header line followed by the body.
    pub fn format(&self) -> String {
        format!("{}\n{}", self.header(), self.body)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        switchboard_sessions::{Error as SessionError, MemorySessionStore},
    };

    fn sender(raw: &str) -> SenderId {
        SenderId::parse(raw).unwrap()
    }

    fn envelope(previous_at: Option<i64>) -> Envelope {
        Envelope {
            channel: "email".into(),
            account_id: "work".into(),
            agent_id: "main".into(),
            session_key: SessionKey::for_peer("email", "work", "boss@x.com", None),
            from: sender("boss@x.com"),
            display_name: Some("Boss".into()),
            subject: Some("Quarterly numbers".into()),
            body: "Can you summarize?".into(),
            received_at: 1_767_268_800_000, // 2026-01-01 12:00 UTC
            previous_at,
        }
    }

    #[test]
    fn first_turn_has_no_elapsed() {
        let env = envelope(None);
        assert!(env.is_first_turn());
        assert_eq!(
            env.format(),
            "[Email Boss <boss@x.com> 2026-01-01 12:00 UTC] [Subject: Quarterly numbers]\n\
             Can you summarize?"
        );
    }

    #[test]
    fn later_turn_shows_elapsed() {
        let env = envelope(Some(1_767_268_800_000 - 3 * 3_600_000));
        assert!(env.header().starts_with("[Email Boss <boss@x.com> +3h 2026-01-01"));
    }

    #[test]
    fn blank_subject_and_name_are_omitted() {
        let mut env = envelope(None);
        env.subject = Some("  ".into());
        env.display_name = None;
        assert_eq!(env.header(), "[Email boss@x.com 2026-01-01 12:00 UTC]");
    }

    #[test]
    fn session_key_is_deterministic() {
        let a = SessionContinuity::resolve_session_key("email", "work", &sender("Boss@X.com"), None);
        let b = SessionContinuity::resolve_session_key("email", "work", &sender("boss@x.com "), None);
        assert_eq!(a, b);
        let threaded =
            SessionContinuity::resolve_session_key("email", "work", &sender("boss@x.com"), Some("t1"));
        assert_ne!(a, threaded);
    }

    #[tokio::test]
    async fn previous_timestamp_continuity() {
        let continuity = SessionContinuity::new(Arc::new(MemorySessionStore::new()));
        let router = DefaultAgentRouter::new("main");
        let s = sender("boss@x.com");
        let route = router
            .resolve_route("email", "work", &RoutePeer {
                sender: &s,
                thread_id: None,
                agent_hint: None,
            })
            .await
            .unwrap();

        assert_eq!(continuity.read_previous_timestamp(&route.session_key).await, None);
        continuity.record_inbound(&route, "email", "work", &s, 1_000).await;
        assert_eq!(
            continuity.read_previous_timestamp(&route.session_key).await,
            Some(1_000)
        );
    }

    #[tokio::test]
    async fn router_prefers_account_agent() {
        let router = DefaultAgentRouter::new("main");
        let s = sender("boss@x.com");
        let route = router
            .resolve_route("email", "work", &RoutePeer {
                sender: &s,
                thread_id: None,
                agent_hint: Some("support"),
            })
            .await
            .unwrap();
        assert_eq!(route.agent_id, "support");
    }

    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn read_updated_at(&self, _key: &SessionKey) -> switchboard_sessions::Result<Option<i64>> {
            Err(SessionError::message("disk gone"))
        }

        async fn get(&self, _key: &SessionKey) -> switchboard_sessions::Result<Option<SessionRecord>> {
            Err(SessionError::message("disk gone"))
        }

        async fn write(&self, _record: SessionRecord) -> switchboard_sessions::Result<()> {
            Err(SessionError::message("disk gone"))
        }

        async fn list(
            &self,
            _channel: &str,
            _account_id: &str,
        ) -> switchboard_sessions::Result<Vec<SessionRecord>> {
            Err(SessionError::message("disk gone"))
        }
    }

    #[tokio::test]
    async fn store_failures_degrade() {
        let continuity = SessionContinuity::new(Arc::new(BrokenStore));
        let key = SessionKey::for_peer("email", "work", "boss@x.com", None);
        assert_eq!(continuity.read_previous_timestamp(&key).await, None);
        let route = AgentRoute {
            agent_id: "main".into(),
            session_key: key,
        };
        continuity
            .record_inbound(&route, "email", "work", &sender("boss@x.com"), 5)
            .await;
    }
}
