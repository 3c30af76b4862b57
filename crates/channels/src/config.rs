use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

use crate::{
    Error, Result,
    gating::{DmPolicy, SenderId},
};

/// Per-account channel configuration, deserialized from the account body
/// under `channels.<channel>.<account_id>`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelAccountConfig {
    pub dm_policy: DmPolicy,

    /// Static allow-list entries; merged with the persisted list at admission.
    pub allowlist: Vec<String>,

    /// Agent that handles this account; the router default applies when unset.
    pub agent_id: Option<String>,

    /// The account's own address. When unset it is fetched from the transport.
    pub self_identity: Option<String>,

    /// Transport credential.
    pub token: Option<Secret<String>>,

    /// Key sessions by thread as well as by sender.
    pub thread_replies: bool,
}

impl ChannelAccountConfig {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Fail with a non-retryable error when the account cannot run.
    pub fn ensure_configured(&self, account_id: &str) -> Result<()> {
        let has_token = self
            .token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().trim().is_empty());
        if !has_token && self.configured_identity().is_none() {
            return Err(Error::unavailable(format!(
                "account {account_id} is not configured: missing token and self_identity"
            )));
        }
        Ok(())
    }

    /// `self_identity` from config, normalized.
    pub fn configured_identity(&self) -> Option<SenderId> {
        self.self_identity.as_deref().and_then(SenderId::parse)
    }
}
