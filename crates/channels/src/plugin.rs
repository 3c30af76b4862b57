use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    switchboard_sessions::SessionKey,
    tokio::sync::mpsc,
};

use crate::{Result, continuity::Envelope, dispatch::ReplyFragment, gating::SenderId};

// ── Channel events (pub/sub) ────────────────────────────────────────────────

/// Events emitted by the orchestrator for observers (UI, audit).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelEvent {
    InboundMessage {
        channel: String,
        account_id: String,
        peer_id: String,
        sender_name: Option<String>,
        access_granted: bool,
    },
    /// An inbound message was not handed to an agent.
    InboundDropped {
        channel: String,
        account_id: String,
        reason: String,
        target: String,
    },
    /// A new pairing request was created and its code sent to the sender.
    PairingRequested {
        channel: String,
        account_id: String,
        peer_id: String,
        sender_name: Option<String>,
        code: String,
    },
    PairingApproved {
        channel: String,
        peer_id: String,
    },
    AccountStatusChanged {
        channel: String,
        account_id: String,
        connected: bool,
        error: Option<String>,
    },
}

/// Sink for channel events. Every method defaults to a no-op.
#[async_trait]
pub trait ChannelEventSink: Send + Sync {
    async fn emit(&self, _event: ChannelEvent) {}
}

/// Event sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl ChannelEventSink for NoopEventSink {}

// ── Transport ───────────────────────────────────────────────────────────────

/// Where to send a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReplyTarget {
    pub channel: String,
    pub account_id: String,
    /// Peer address to send the reply to.
    pub to: String,
    /// Transport reference of the message being answered, for threading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ref: Option<String>,
}

/// Transport-specific operations the orchestrator needs from a channel.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn send_reply(&self, target: &ChannelReplyTarget, text: &str) -> Result<()>;

    /// Acknowledge an inbound message (mark read, add a reaction, ...).
    async fn mark_processed(&self, account_id: &str, event_ref: &str) -> Result<()>;

    /// The account's own identity, as reported by the transport.
    async fn fetch_self(&self, account_id: &str) -> Result<String>;

    /// Send a "typing" indicator. No-op by default.
    async fn send_typing(&self, _target: &ChannelReplyTarget) -> Result<()> {
        Ok(())
    }
}

/// Channel health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelHealthSnapshot {
    pub connected: bool,
    pub account_id: String,
    pub details: Option<String>,
}

// ── Agents ──────────────────────────────────────────────────────────────────

/// The peer a route is being resolved for.
#[derive(Debug, Clone)]
pub struct RoutePeer<'a> {
    pub sender: &'a SenderId,
    pub thread_id: Option<&'a str>,
    /// Agent configured on the account, if any.
    pub agent_hint: Option<&'a str>,
}

/// Agent and session chosen for an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRoute {
    pub agent_id: String,
    pub session_key: SessionKey,
}

/// Picks the agent and session for an admitted message.
#[async_trait]
pub trait AgentRouter: Send + Sync {
    async fn resolve_route(
        &self,
        channel: &str,
        account_id: &str,
        peer: &RoutePeer<'_>,
    ) -> Result<AgentRoute>;
}

/// Receiver end of an agent's reply stream.
pub type FragmentReceiver = mpsc::Receiver<ReplyFragment>;

/// Sender end of an agent's reply stream.
pub type FragmentSender = mpsc::Sender<ReplyFragment>;

/// Runs an agent on an envelope and streams its reply fragments back.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, envelope: Envelope) -> Result<FragmentReceiver>;
}
