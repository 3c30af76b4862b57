//! Inbound admission and dispatch for channel accounts.
//!
//! Every inbound event goes through the same pipeline: the admission gate
//! (allow-list and pairing), session continuity, agent invocation and
//! ordered, failure-isolated reply dispatch. Transports, agents and storage
//! plug in through the traits in [`plugin`] and [`store`].

pub mod admission;
pub mod config;
pub mod continuity;
pub mod dispatch;
pub mod error;
pub mod gating;
pub mod inbound;
pub mod message_log;
pub mod pairing;
pub mod plugin;
pub mod sqlite;
pub mod state;
pub mod store;

pub use {
    admission::{AdmissionDecision, AdmissionPolicy, AdmissionRequest, DropRecord},
    config::ChannelAccountConfig,
    continuity::{DefaultAgentRouter, Envelope, SessionContinuity},
    dispatch::{DispatchSummary, FragmentDelivery, ReplyDispatcher, ReplyFragment, ReplyKind},
    error::{Error, Result},
    gating::{DmPolicy, EffectiveAllowList, SenderId, normalize_identity},
    inbound::{ChannelServices, InboundEvent, InboundOrchestrator, InboundOutcome},
    pairing::{ApprovalNotifier, PairingRegistry},
    plugin::{
        AgentInvoker, AgentRoute, AgentRouter, ChannelEvent, ChannelEventSink,
        ChannelHealthSnapshot, ChannelReplyTarget, ChannelTransport, FragmentReceiver,
        FragmentSender, NoopEventSink, RoutePeer,
    },
    sqlite::{SqliteMessageLog, SqlitePairingStore},
    state::{AccountState, AccountStateMap, AccountStatus},
    store::{AllowListStore, MemoryPairingStore, PairingRequest, PairingStatus, PairingStore},
};

/// Run database migrations for the channels crate.
///
/// Creates the `pairing_requests`, `allow_from` and `message_log` tables.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
