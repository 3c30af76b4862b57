use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level switchboard configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Directory for the SQLite database and other state.
    /// Defaults to the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Explicit sqlx database URL; overrides `data_dir/switchboard.db`.
    pub database_url: Option<String>,

    /// Channel accounts: `channels.<channel>.<account_id> = { ... }`.
    ///
    /// Account bodies stay untyped here; each channel crate deserializes
    /// its own account config from the JSON value.
    pub channels: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl SwitchboardConfig {
    /// Raw config for one channel account.
    pub fn account(&self, channel: &str, account_id: &str) -> Option<&serde_json::Value> {
        self.channels.get(channel)?.get(account_id)
    }

    /// Every configured `(channel, account_id, config)` triple.
    pub fn accounts(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.channels.iter().flat_map(|(channel, accounts)| {
            accounts
                .iter()
                .map(move |(id, cfg)| (channel.as_str(), id.as_str(), cfg))
        })
    }

    /// Database URL, falling back to `<data_dir>/switchboard.db`.
    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }
        let dir = self.data_dir.clone().unwrap_or_else(crate::loader::data_dir);
        format!("sqlite:{}?mode=rwc", dir.join("switchboard.db").display())
    }
}
