//! The inbound orchestrator: admission, continuity, agent invocation and
//! reply dispatch for every message a channel receives.

use std::sync::{Arc, PoisonError};

use {
    async_trait::async_trait,
    switchboard_sessions::{SessionKey, SessionStore},
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    admission::{AdmissionDecision, AdmissionPolicy, AdmissionRequest},
    config::ChannelAccountConfig,
    continuity::{Envelope, SessionContinuity},
    dispatch::{DispatchSummary, ReplyDispatcher, TransportDelivery},
    gating::{DmPolicy, SenderId},
    message_log::{MessageLog, MessageLogEntry},
    pairing::{ApprovalNotifier, PairingRegistry, build_approval_notice},
    plugin::{
        AgentInvoker, AgentRouter, ChannelEvent, ChannelEventSink, ChannelHealthSnapshot,
        ChannelReplyTarget, ChannelTransport, RoutePeer,
    },
    state::{AccountState, AccountStateMap},
    store::{AllowListStore, PairingRequest, PairingStore},
};

/// One message as delivered by a transport.
#[derive(Debug, Clone, Default)]
pub struct InboundEvent {
    /// Raw sender identity; normalized before any comparison.
    pub sender: String,
    pub display_name: Option<String>,
    /// Subject line or channel label.
    pub subject: Option<String>,
    pub body: String,
    /// Receipt time, epoch milliseconds.
    pub received_at: i64,
    /// Transport message id, used for dedup and mark-as-processed.
    pub external_id: String,
    /// Conversation thread, used for the session key when `thread_replies` is on.
    pub thread_id: Option<String>,
    /// Transport reference replies should thread under.
    pub thread_ref: Option<String>,
    /// Reply address when it differs from the sender.
    pub reply_to: Option<String>,
}

/// What the orchestrator did with an inbound event.
#[derive(Debug)]
pub enum InboundOutcome {
    /// Admitted, handed to the agent, and its reply dispatched.
    Dispatched {
        agent_id: String,
        session_key: SessionKey,
        summary: DispatchSummary,
    },
    /// Not admitted: denied, or held for pairing.
    Dropped { decision: AdmissionDecision },
    /// The transport redelivered a message already handled.
    Duplicate,
    /// The account's own message echoed back.
    SelfMessage,
    /// The event was malformed and dropped.
    Invalid { reason: String },
}

/// Collaborators the orchestrator needs.
#[derive(Clone)]
pub struct ChannelServices {
    pub transport: Arc<dyn ChannelTransport>,
    pub pairing_store: Arc<dyn PairingStore>,
    pub allow_store: Arc<dyn AllowListStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub router: Arc<dyn AgentRouter>,
    pub agent: Arc<dyn AgentInvoker>,
    pub events: Arc<dyn ChannelEventSink>,
    pub message_log: Option<Arc<dyn MessageLog>>,
}

/// Runs the inbound pipeline for every account of one channel.
pub struct InboundOrchestrator {
    channel: String,
    accounts: AccountStateMap,
    registry: Arc<PairingRegistry>,
    admission: AdmissionPolicy,
    continuity: SessionContinuity,
    transport: Arc<dyn ChannelTransport>,
    router: Arc<dyn AgentRouter>,
    agent: Arc<dyn AgentInvoker>,
    events: Arc<dyn ChannelEventSink>,
    message_log: Option<Arc<dyn MessageLog>>,
}

impl InboundOrchestrator {
    pub fn new(channel: impl Into<String>, services: ChannelServices) -> Self {
        let registry = Arc::new(PairingRegistry::new(services.pairing_store));
        let admission = AdmissionPolicy::new(
            Arc::clone(&registry),
            services.allow_store,
            Arc::clone(&services.transport),
            Arc::clone(&services.events),
        );
        Self {
            channel: channel.into().trim().to_lowercase(),
            accounts: AccountStateMap::default(),
            registry,
            admission,
            continuity: SessionContinuity::new(services.sessions),
            transport: services.transport,
            router: services.router,
            agent: services.agent,
            events: services.events,
            message_log: services.message_log,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn accounts(&self) -> &AccountStateMap {
        &self.accounts
    }

    pub fn account(&self, account_id: &str) -> Option<Arc<AccountState>> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account_id)
            .cloned()
    }

    /// Validate an account's config, resolve its own identity and start
    /// accepting events for it.
    pub async fn start_account(&self, account_id: &str, config: serde_json::Value) -> Result<()> {
        if let Err(e) = self.try_start_account(account_id, config).await {
            warn!(channel = %self.channel, account_id, error = %e, "failed to start channel account");
            self.emit_status(account_id, false, Some(e.to_string())).await;
            return Err(e);
        }
        Ok(())
    }

    async fn try_start_account(&self, account_id: &str, config: serde_json::Value) -> Result<()> {
        let config = ChannelAccountConfig::from_value(config)?;
        config.ensure_configured(account_id)?;

        let self_identity = match config.configured_identity() {
            Some(id) => id,
            None => {
                let raw = self.transport.fetch_self(account_id).await?;
                SenderId::parse(&raw).ok_or_else(|| {
                    Error::unavailable(format!("transport reported an empty identity for {account_id}"))
                })?
            },
        };

        if config.dm_policy == DmPolicy::Open {
            warn!(
                channel = %self.channel,
                account_id,
                "dm_policy is open: any sender can trigger the agent"
            );
        }
        info!(
            channel = %self.channel,
            account_id,
            self_identity = %self_identity,
            dm_policy = %config.dm_policy,
            "channel account started"
        );

        let state = Arc::new(AccountState::new(account_id, config, self_identity));
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account_id.to_string(), state);
        self.emit_status(account_id, true, None).await;
        Ok(())
    }

    /// Stop accepting events for an account. Returns `false` if it was not running.
    pub async fn stop_account(&self, account_id: &str) -> bool {
        let removed = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(account_id)
            .is_some();
        if removed {
            info!(channel = %self.channel, account_id, "channel account stopped");
            self.emit_status(account_id, false, None).await;
        }
        removed
    }

    pub fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot> {
        self.account(account_id)
            .map(|a| a.health())
            .ok_or_else(|| Error::unknown_account(account_id))
    }

    /// Run one inbound event through the pipeline.
    ///
    /// Errors are limited to unknown accounts, pairing store failures and
    /// routing or agent failures. Allow-list, session, mark-processed and
    /// delivery failures are logged and degraded. After an error the event's
    /// id is forgotten, so a redelivery runs the pipeline again.
    pub async fn handle_inbound(
        &self,
        account_id: &str,
        event: InboundEvent,
    ) -> Result<InboundOutcome> {
        let account = self
            .account(account_id)
            .ok_or_else(|| Error::unknown_account(account_id))?;

        let Some(sender) = SenderId::parse(&event.sender) else {
            warn!(
                channel = %self.channel,
                account_id,
                external_id = %event.external_id,
                "inbound event without sender identity, dropping"
            );
            return Ok(InboundOutcome::Invalid {
                reason: "missing sender identity".into(),
            });
        };

        let external_id = event.external_id.trim().to_string();
        if !external_id.is_empty() && !account.first_delivery(&external_id) {
            debug!(channel = %self.channel, account_id, external_id = %external_id, "duplicate inbound event");
            return Ok(InboundOutcome::Duplicate);
        }

        if sender == account.self_identity {
            debug!(channel = %self.channel, account_id, "ignoring message from own identity");
            return Ok(InboundOutcome::SelfMessage);
        }

        let outcome = self
            .admit_and_dispatch(&account, account_id, &sender, &external_id, event)
            .await;
        if outcome.is_err() && !external_id.is_empty() {
            // A failed run must not turn the transport's retry into a duplicate.
            account.forget_delivery(&external_id);
        }
        outcome
    }

    async fn admit_and_dispatch(
        &self,
        account: &AccountState,
        account_id: &str,
        sender: &SenderId,
        external_id: &str,
        event: InboundEvent,
    ) -> Result<InboundOutcome> {
        let reply_to = event
            .reply_to
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(event.sender.trim());
        let reply_target = ChannelReplyTarget {
            channel: self.channel.clone(),
            account_id: account_id.to_string(),
            to: reply_to.to_string(),
            thread_ref: event.thread_ref.clone(),
        };

        let decision = self
            .admission
            .admit(&AdmissionRequest {
                channel: &self.channel,
                account_id,
                sender,
                display_name: event.display_name.as_deref(),
                policy: account.config.dm_policy,
                static_allowlist: &account.config.allowlist,
                reply_target: &reply_target,
            })
            .await?;

        let granted = decision.is_allowed();
        account.record_inbound(event.received_at);
        self.log_inbound(account_id, sender, &event, granted).await;
        if !granted {
            return Ok(InboundOutcome::Dropped { decision });
        }

        if !external_id.is_empty()
            && let Err(e) = self.transport.mark_processed(account_id, external_id).await
        {
            warn!(channel = %self.channel, account_id, external_id, error = %e, "failed to mark message processed");
        }

        let thread_id = if account.config.thread_replies {
            event.thread_id.as_deref()
        } else {
            None
        };
        let route = self
            .router
            .resolve_route(&self.channel, account_id, &RoutePeer {
                sender,
                thread_id,
                agent_hint: account.config.agent_id.as_deref(),
            })
            .await?;

        let previous_at = self
            .continuity
            .read_previous_timestamp(&route.session_key)
            .await;
        self.continuity
            .record_inbound(&route, &self.channel, account_id, sender, event.received_at)
            .await;

        let envelope = Envelope {
            channel: self.channel.clone(),
            account_id: account_id.to_string(),
            agent_id: route.agent_id.clone(),
            session_key: route.session_key.clone(),
            from: sender.clone(),
            display_name: event.display_name,
            subject: event.subject,
            body: event.body,
            received_at: event.received_at,
            previous_at,
        };

        if let Err(e) = self.transport.send_typing(&reply_target).await {
            debug!(channel = %self.channel, account_id, error = %e, "typing indicator failed");
        }

        let rx = match self.agent.invoke(envelope).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(
                    channel = %self.channel,
                    account_id,
                    agent_id = %route.agent_id,
                    error = %e,
                    "agent invocation failed"
                );
                account.record_error(e.to_string());
                return Err(e);
            },
        };

        let delivery = TransportDelivery::new(Arc::clone(&self.transport), reply_target);
        let summary = ReplyDispatcher::new(&delivery)
            .on_error(|failure| {
                account.record_error(format!(
                    "{} fragment {} failed: {}",
                    failure.kind.as_str(),
                    failure.index,
                    failure.error
                ));
            })
            .dispatch_stream(rx)
            .await;

        debug!(
            channel = %self.channel,
            account_id,
            session_key = %route.session_key,
            delivered = summary.delivered,
            failed = summary.failures.len(),
            "reply dispatched"
        );
        Ok(InboundOutcome::Dispatched {
            agent_id: route.agent_id,
            session_key: route.session_key,
            summary,
        })
    }

    /// Approve a pending pairing request by code and notify the sender.
    pub async fn approve_pairing(&self, code: &str) -> Result<Option<PairingRequest>> {
        let notifier = TransportNotifier {
            transport: self.transport.as_ref(),
        };
        let approved = self
            .registry
            .approve_by_code(&self.channel, code, Some(&notifier))
            .await?;
        if let Some(request) = &approved {
            self.events
                .emit(ChannelEvent::PairingApproved {
                    channel: self.channel.clone(),
                    peer_id: request.sender_id.clone(),
                })
                .await;
        }
        Ok(approved)
    }

    /// Reject a pending pairing request.
    pub async fn reject_pairing(&self, sender: &str) -> Result<bool> {
        let sender =
            SenderId::parse(sender).ok_or_else(|| Error::invalid_input("empty sender identity"))?;
        self.registry.reject(&self.channel, &sender).await
    }

    pub async fn list_pending(&self) -> Result<Vec<PairingRequest>> {
        self.registry.list_pending(&self.channel).await
    }

    /// Send approval notices for approvals made elsewhere (e.g. the CLI).
    pub async fn deliver_pending_notices(&self) -> Result<usize> {
        let notifier = TransportNotifier {
            transport: self.transport.as_ref(),
        };
        let delivered = self
            .registry
            .deliver_pending_notices(&self.channel, &notifier)
            .await?;
        if delivered > 0 {
            info!(channel = %self.channel, delivered, "approval notices delivered");
        }
        Ok(delivered)
    }

    async fn log_inbound(
        &self,
        account_id: &str,
        sender: &SenderId,
        event: &InboundEvent,
        access_granted: bool,
    ) {
        if let Some(log) = &self.message_log {
            let entry = MessageLogEntry {
                id: 0,
                channel: self.channel.clone(),
                account_id: account_id.to_string(),
                peer_id: sender.to_string(),
                sender_name: event.display_name.clone(),
                external_id: event.external_id.clone(),
                subject: event.subject.clone(),
                body: event.body.clone(),
                access_granted,
                created_at: event.received_at,
            };
            if let Err(e) = log.log(entry).await {
                warn!(channel = %self.channel, account_id, error = %e, "failed to log inbound message");
            }
        }
        self.events
            .emit(ChannelEvent::InboundMessage {
                channel: self.channel.clone(),
                account_id: account_id.to_string(),
                peer_id: sender.to_string(),
                sender_name: event.display_name.clone(),
                access_granted,
            })
            .await;
    }

    async fn emit_status(&self, account_id: &str, connected: bool, error: Option<String>) {
        self.events
            .emit(ChannelEvent::AccountStatusChanged {
                channel: self.channel.clone(),
                account_id: account_id.to_string(),
                connected,
                error,
            })
            .await;
    }
}

/// Sends approval notices through the channel transport.
struct TransportNotifier<'a> {
    transport: &'a dyn ChannelTransport,
}

#[async_trait]
impl ApprovalNotifier for TransportNotifier<'_> {
    async fn notify_approval(&self, request: &PairingRequest) -> Result<()> {
        let target = ChannelReplyTarget {
            channel: request.channel.clone(),
            account_id: request.account_id.clone(),
            to: request
                .reply_to
                .clone()
                .unwrap_or_else(|| request.sender_id.clone()),
            thread_ref: None,
        };
        self.transport
            .send_reply(&target, &build_approval_notice())
            .await
    }
}
