//! The admission gate run before any agent work.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    Result,
    gating::{DmPolicy, EffectiveAllowList, SenderId, load_effective_allowlist},
    pairing::{PairingRegistry, build_pairing_reply},
    plugin::{ChannelEvent, ChannelEventSink, ChannelReplyTarget, ChannelTransport},
    store::{AllowListStore, PairingMeta, PairingStatus},
};

/// Outcome of the admission gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Hand the message to the agent.
    Allow,
    /// Sender is waiting on pairing approval. `created` is true only for the
    /// message that opened the request (and triggered the code reply).
    Pair { code: String, created: bool },
    /// Silently drop.
    Deny,
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Structured record of a message that was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropRecord {
    pub channel: String,
    pub account_id: String,
    /// `dmPolicy=<mode>`.
    pub reason: String,
    pub target: String,
}

impl DropRecord {
    pub fn new(channel: &str, account_id: &str, policy: DmPolicy, target: &SenderId) -> Self {
        Self {
            channel: channel.to_string(),
            account_id: account_id.to_string(),
            reason: format!("dmPolicy={policy}"),
            target: target.to_string(),
        }
    }
}

/// Pure policy check against an already resolved allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Allow,
    Deny,
    NeedsPairing,
}

pub fn gate(policy: DmPolicy, sender: &SenderId, allowlist: &EffectiveAllowList) -> Gate {
    match policy {
        DmPolicy::Open => Gate::Allow,
        _ if allowlist.contains(sender) => Gate::Allow,
        DmPolicy::Allowlist => Gate::Deny,
        DmPolicy::Pairing => Gate::NeedsPairing,
    }
}

/// One sender's admission question.
#[derive(Debug, Clone)]
pub struct AdmissionRequest<'a> {
    pub channel: &'a str,
    pub account_id: &'a str,
    pub sender: &'a SenderId,
    pub display_name: Option<&'a str>,
    pub policy: DmPolicy,
    /// Allow-list entries from the account config.
    pub static_allowlist: &'a [String],
    /// Where the pairing reply goes.
    pub reply_target: &'a ChannelReplyTarget,
}

/// Decides allow / pair / deny and performs the pairing side effects.
pub struct AdmissionPolicy {
    registry: Arc<PairingRegistry>,
    allow_store: Arc<dyn AllowListStore>,
    transport: Arc<dyn ChannelTransport>,
    events: Arc<dyn ChannelEventSink>,
}

impl AdmissionPolicy {
    pub fn new(
        registry: Arc<PairingRegistry>,
        allow_store: Arc<dyn AllowListStore>,
        transport: Arc<dyn ChannelTransport>,
        events: Arc<dyn ChannelEventSink>,
    ) -> Self {
        Self {
            registry,
            allow_store,
            transport,
            events,
        }
    }

    /// Run the gate for one inbound message.
    ///
    /// `open` short-circuits without touching any store. Denials and pairing
    /// holds emit a [`DropRecord`].
    pub async fn admit(&self, req: &AdmissionRequest<'_>) -> Result<AdmissionDecision> {
        if req.policy == DmPolicy::Open {
            return Ok(AdmissionDecision::Allow);
        }

        let allowlist =
            load_effective_allowlist(req.static_allowlist, self.allow_store.as_ref(), req.channel)
                .await;

        let decision = match gate(req.policy, req.sender, &allowlist) {
            Gate::Allow => AdmissionDecision::Allow,
            Gate::Deny => AdmissionDecision::Deny,
            Gate::NeedsPairing => self.pair(req).await?,
        };

        if !decision.is_allowed() {
            self.record_drop(DropRecord::new(req.channel, req.account_id, req.policy, req.sender))
                .await;
        }
        Ok(decision)
    }

    async fn pair(&self, req: &AdmissionRequest<'_>) -> Result<AdmissionDecision> {
        let _guard = self.registry.lock_sender(req.channel, req.sender).await;

        let meta = PairingMeta {
            account_id: req.account_id.to_string(),
            display_name: req.display_name.map(str::to_string),
            reply_to: Some(req.reply_target.to.clone()),
        };
        let upsert = self
            .registry
            .upsert_pairing_request(req.channel, req.sender, meta)
            .await?;

        if upsert.status == PairingStatus::Approved {
            // Approved but missing from the list we read (e.g. degraded store read).
            debug!(channel = req.channel, sender = %req.sender, "sender already approved");
            return Ok(AdmissionDecision::Allow);
        }

        if upsert.created {
            info!(
                channel = req.channel,
                account_id = req.account_id,
                sender = %req.sender,
                "pairing request created"
            );
            self.events
                .emit(ChannelEvent::PairingRequested {
                    channel: req.channel.to_string(),
                    account_id: req.account_id.to_string(),
                    peer_id: req.sender.to_string(),
                    sender_name: req.display_name.map(str::to_string),
                    code: upsert.code.clone(),
                })
                .await;
        }

        // Resend until one reply gets through; the sender lock keeps it to one send.
        if !upsert.reply_sent {
            self.send_pairing_reply(req, &upsert.code).await;
        }

        Ok(AdmissionDecision::Pair {
            code: upsert.code,
            created: upsert.created,
        })
    }

    async fn send_pairing_reply(&self, req: &AdmissionRequest<'_>, code: &str) {
        let id_line = format!("Your {} identity: {}", req.channel, req.sender);
        let reply = build_pairing_reply(req.channel, &id_line, code);
        if let Err(e) = self.transport.send_reply(req.reply_target, &reply).await {
            warn!(
                channel = req.channel,
                account_id = req.account_id,
                sender = %req.sender,
                error = %e,
                "failed to send pairing reply, will retry on next message"
            );
            return;
        }
        if let Err(e) = self
            .registry
            .store()
            .mark_reply_sent(req.channel, req.sender)
            .await
        {
            warn!(
                channel = req.channel,
                sender = %req.sender,
                error = %e,
                "failed to record pairing reply"
            );
        }
    }

    async fn record_drop(&self, record: DropRecord) {
        info!(
            channel = %record.channel,
            account_id = %record.account_id,
            reason = %record.reason,
            target = %record.target,
            "inbound dropped"
        );
        self.events
            .emit(ChannelEvent::InboundDropped {
                channel: record.channel,
                account_id: record.account_id,
                reason: record.reason,
                target: record.target,
            })
            .await;
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            Error,
            plugin::NoopEventSink,
            store::{MemoryPairingStore, PairingStore},
        },
        async_trait::async_trait,
        rstest::rstest,
        std::sync::{Mutex, PoisonError},
    };

    fn sender(raw: &str) -> SenderId {
        SenderId::parse(raw).unwrap()
    }

    #[derive(Default)]
    struct RecordingTransport {
        replies: Mutex<Vec<String>>,
        /// Sends still to fail before replies go through.
        failures: Mutex<u32>,
    }

    #[async_trait]
    impl ChannelTransport for RecordingTransport {
        async fn send_reply(&self, _target: &ChannelReplyTarget, text: &str) -> Result<()> {
            {
                let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
                if *failures > 0 {
                    *failures -= 1;
                    return Err(Error::unavailable("smtp down"));
                }
            }
            self.replies
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(text.to_string());
            Ok(())
        }

        async fn mark_processed(&self, _account_id: &str, _event_ref: &str) -> Result<()> {
            Ok(())
        }

        async fn fetch_self(&self, _account_id: &str) -> Result<String> {
            Ok("bot@x.com".into())
        }
    }

    struct FailingAllowList;

    #[async_trait]
    impl AllowListStore for FailingAllowList {
        async fn read(&self, _channel: &str) -> Result<Vec<String>> {
            Err(Error::unavailable("allow-list offline"))
        }

        async fn add(&self, _channel: &str, _sender: &SenderId) -> Result<bool> {
            Err(Error::unavailable("allow-list offline"))
        }
    }

    struct Harness {
        policy: AdmissionPolicy,
        store: Arc<MemoryPairingStore>,
        transport: Arc<RecordingTransport>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryPairingStore::new());
        let transport = Arc::new(RecordingTransport::default());
        let policy = AdmissionPolicy::new(
            Arc::new(PairingRegistry::new(store.clone())),
            store.clone(),
            transport.clone(),
            Arc::new(NoopEventSink),
        );
        Harness {
            policy,
            store,
            transport,
        }
    }

    fn target() -> ChannelReplyTarget {
        ChannelReplyTarget {
            channel: "email".into(),
            account_id: "work".into(),
            to: "new@x.com".into(),
            thread_ref: Some("<m1@mail>".into()),
        }
    }

    fn request<'a>(
        sender: &'a SenderId,
        policy: DmPolicy,
        static_allowlist: &'a [String],
        reply_target: &'a ChannelReplyTarget,
    ) -> AdmissionRequest<'a> {
        AdmissionRequest {
            channel: "email",
            account_id: "work",
            sender,
            display_name: Some("New"),
            policy,
            static_allowlist,
            reply_target,
        }
    }

    #[rstest]
    #[case(DmPolicy::Open, &[], true)]
    #[case(DmPolicy::Allowlist, &[], false)]
    #[case(DmPolicy::Allowlist, &["*"], true)]
    #[case(DmPolicy::Allowlist, &["A@X.com"], true)]
    #[case(DmPolicy::Pairing, &["a@x.com"], true)]
    #[case(DmPolicy::Pairing, &["*"], true)]
    fn gate_table(#[case] policy: DmPolicy, #[case] entries: &[&str], #[case] allowed: bool) {
        let config: Vec<String> = entries.iter().map(|e| (*e).to_string()).collect();
        let list = EffectiveAllowList::resolve(&config, &[]);
        assert_eq!(gate(policy, &sender("a@x.com"), &list) == Gate::Allow, allowed);
    }

    #[test]
    fn pairing_without_membership_needs_pairing() {
        let list = EffectiveAllowList::default();
        assert_eq!(gate(DmPolicy::Pairing, &sender("a@x.com"), &list), Gate::NeedsPairing);
    }

    #[test]
    fn drop_reason_names_policy() {
        let record = DropRecord::new("email", "work", DmPolicy::Pairing, &sender("new@x.com"));
        assert_eq!(record.reason, "dmPolicy=pairing");
        assert_eq!(record.target, "new@x.com");
    }

    #[tokio::test]
    async fn pairing_replies_once() {
        let h = harness();
        let s = sender("new@x.com");
        let t = target();

        let first = h.policy.admit(&request(&s, DmPolicy::Pairing, &[], &t)).await.unwrap();
        let second = h.policy.admit(&request(&s, DmPolicy::Pairing, &[], &t)).await.unwrap();

        let (AdmissionDecision::Pair { code: c1, created: true }, AdmissionDecision::Pair {
            code: c2,
            created: false,
        }) = (first, second)
        else {
            panic!("expected a created then a reused pairing request");
        };
        assert_eq!(c1, c2);
        assert_eq!(h.store.list_pending("email").await.unwrap().len(), 1);
        let replies = h.transport.replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains(&c1));
    }

    #[tokio::test]
    async fn failed_pairing_reply_is_resent_once() {
        let h = harness();
        *h.transport.failures.lock().unwrap() = 1;
        let s = sender("new@x.com");
        let t = target();

        let first = h.policy.admit(&request(&s, DmPolicy::Pairing, &[], &t)).await.unwrap();
        assert!(matches!(first, AdmissionDecision::Pair { created: true, .. }));
        assert!(h.transport.replies.lock().unwrap().is_empty());
        assert!(!h.store.get("email", &s).await.unwrap().unwrap().reply_sent);

        // The next message delivers the code, and later ones stay silent.
        for _ in 0..3 {
            let d = h.policy.admit(&request(&s, DmPolicy::Pairing, &[], &t)).await.unwrap();
            assert!(matches!(d, AdmissionDecision::Pair { created: false, .. }));
        }
        let pending = h.store.list_pending("email").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].reply_sent);
        let replies = h.transport.replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains(&pending[0].code));
    }

    #[tokio::test]
    async fn approved_sender_is_admitted_via_persisted_list() {
        let h = harness();
        let s = sender("new@x.com");
        let t = target();
        h.policy.admit(&request(&s, DmPolicy::Pairing, &[], &t)).await.unwrap();
        h.store.approve("email", &s).await.unwrap();

        for policy in [DmPolicy::Pairing, DmPolicy::Allowlist] {
            let d = h.policy.admit(&request(&s, policy, &[], &t)).await.unwrap();
            assert_eq!(d, AdmissionDecision::Allow, "{policy}");
        }
    }

    #[tokio::test]
    async fn allowlist_denies_silently() {
        let h = harness();
        let s = sender("stranger@x.com");
        let t = target();
        let d = h.policy.admit(&request(&s, DmPolicy::Allowlist, &[], &t)).await.unwrap();
        assert_eq!(d, AdmissionDecision::Deny);
        assert!(h.transport.replies.lock().unwrap().is_empty());
        assert!(h.store.list_pending("email").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_allow_list_store_falls_back_to_config() {
        let store = Arc::new(MemoryPairingStore::new());
        let policy = AdmissionPolicy::new(
            Arc::new(PairingRegistry::new(store)),
            Arc::new(FailingAllowList),
            Arc::new(RecordingTransport::default()),
            Arc::new(NoopEventSink),
        );
        let s = sender("boss@x.com");
        let t = target();
        let config = vec!["boss@x.com".to_string()];
        let d = policy.admit(&request(&s, DmPolicy::Allowlist, &config, &t)).await.unwrap();
        assert_eq!(d, AdmissionDecision::Allow);
    }
}
