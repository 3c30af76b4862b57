//! Ordered, failure-isolated delivery of agent reply fragments.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{
    Result,
    plugin::{ChannelReplyTarget, ChannelTransport, FragmentReceiver},
};

/// What part of the agent's reply a fragment is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    /// Output of a tool call surfaced to the user.
    Tool,
    /// Intermediate streamed block.
    Block,
    /// The closing answer.
    Final,
}

impl ReplyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Block => "block",
            Self::Final => "final",
        }
    }
}

/// A piece of agent output to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFragment {
    pub text: String,
    pub kind: ReplyKind,
}

impl ReplyFragment {
    pub fn new(kind: ReplyKind, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Delivers one fragment to wherever replies go.
#[async_trait]
pub trait FragmentDelivery: Send + Sync {
    async fn deliver(&self, fragment: &ReplyFragment) -> Result<()>;
}

/// Delivery through a channel transport to a fixed reply target.
pub struct TransportDelivery {
    transport: Arc<dyn ChannelTransport>,
    target: ChannelReplyTarget,
}

impl TransportDelivery {
    pub fn new(transport: Arc<dyn ChannelTransport>, target: ChannelReplyTarget) -> Self {
        Self { transport, target }
    }
}

#[async_trait]
impl FragmentDelivery for TransportDelivery {
    async fn deliver(&self, fragment: &ReplyFragment) -> Result<()> {
        self.transport.send_reply(&self.target, &fragment.text).await
    }
}

/// A fragment that could not be delivered.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    /// Position of the fragment in emission order.
    pub index: usize,
    pub kind: ReplyKind,
    pub error: String,
}

/// What happened during one dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub skipped: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl DispatchSummary {
    pub fn all_delivered(&self) -> bool {
        self.failures.is_empty()
    }
}

type ErrorCallback<'a> = Box<dyn Fn(&DeliveryFailure) + Send + Sync + 'a>;

/// Delivers fragments strictly in order, awaiting each before the next.
///
/// A failing fragment is reported and skipped; it never stops the ones
/// after it and never surfaces as an error.
pub struct ReplyDispatcher<'a> {
    delivery: &'a dyn FragmentDelivery,
    on_error: Option<ErrorCallback<'a>>,
}

impl<'a> ReplyDispatcher<'a> {
    pub fn new(delivery: &'a dyn FragmentDelivery) -> Self {
        Self {
            delivery,
            on_error: None,
        }
    }

    /// Called for every failed fragment, in addition to the warning log.
    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&DeliveryFailure) + Send + Sync + 'a) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub async fn dispatch(
        &self,
        fragments: impl IntoIterator<Item = ReplyFragment>,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        for (index, fragment) in fragments.into_iter().enumerate() {
            self.deliver_one(index, &fragment, &mut summary).await;
        }
        summary
    }

    /// Drain an incremental fragment stream until the agent closes it.
    pub async fn dispatch_stream(&self, mut rx: FragmentReceiver) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let mut index = 0;
        while let Some(fragment) = rx.recv().await {
            self.deliver_one(index, &fragment, &mut summary).await;
            index += 1;
        }
        summary
    }

    async fn deliver_one(&self, index: usize, fragment: &ReplyFragment, summary: &mut DispatchSummary) {
        if fragment.is_blank() {
            debug!(index, kind = fragment.kind.as_str(), "skipping blank reply fragment");
            summary.skipped += 1;
            return;
        }
        match self.delivery.deliver(fragment).await {
            Ok(()) => summary.delivered += 1,
            Err(e) => {
                warn!(index, kind = fragment.kind.as_str(), error = %e, "reply fragment delivery failed");
                let failure = DeliveryFailure {
                    index,
                    kind: fragment.kind,
                    error: e.to_string(),
                };
                if let Some(cb) = &self.on_error {
                    cb(&failure);
                }
                summary.failures.push(failure);
            },
        }
    }
}
