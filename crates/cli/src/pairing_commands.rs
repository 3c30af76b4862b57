use std::sync::Arc;

use {
    anyhow::Result,
    clap::Subcommand,
    switchboard_channels::{
        AllowListStore, ChannelAccountConfig, PairingRegistry, PairingRequest, SenderId,
        SqlitePairingStore, normalize_identity,
    },
    switchboard_common::time::to_datetime,
    switchboard_config::SwitchboardConfig,
};

use crate::db_commands::open_pool;

#[derive(Subcommand)]
pub enum PairingAction {
    /// List pending pairing requests.
    List {
        #[arg(long, value_parser = parse_channel)]
        channel: String,
    },
    /// Approve a pending request by its pairing code.
    Approve {
        #[arg(long, value_parser = parse_channel)]
        channel: String,
        code: String,
    },
    /// Drop a pending request. The sender is asked to pair again next time.
    Reject {
        #[arg(long, value_parser = parse_channel)]
        channel: String,
        sender: String,
    },
}

#[derive(Subcommand)]
pub enum AllowlistAction {
    /// Show persisted and configured allow-list entries.
    List {
        #[arg(long, value_parser = parse_channel)]
        channel: String,
    },
}

/// Channel names are stored trimmed and lowercased.
pub fn parse_channel(raw: &str) -> std::result::Result<String, String> {
    let channel = raw.trim().to_lowercase();
    if channel.is_empty() {
        return Err("channel must not be empty".into());
    }
    Ok(channel)
}

pub async fn handle_pairing(config: &SwitchboardConfig, action: PairingAction) -> Result<()> {
    let pool = open_pool(config).await?;
    let registry = PairingRegistry::new(Arc::new(SqlitePairingStore::new(pool)));
    for line in run_pairing(&registry, action).await? {
        println!("{line}");
    }
    Ok(())
}

pub async fn handle_allowlist(config: &SwitchboardConfig, action: AllowlistAction) -> Result<()> {
    let pool = open_pool(config).await?;
    let store = SqlitePairingStore::new(pool);
    match action {
        AllowlistAction::List { channel } => {
            for line in allowlist_lines(config, &store, &channel).await? {
                println!("{line}");
            }
        },
    }
    Ok(())
}

async fn run_pairing(registry: &PairingRegistry, action: PairingAction) -> Result<Vec<String>> {
    match action {
        PairingAction::List { channel } => {
            let pending = registry.list_pending(&channel).await?;
            if pending.is_empty() {
                return Ok(vec![format!("No pending pairing requests on {channel}.")]);
            }
            Ok(pending.iter().map(describe).collect())
        },
        PairingAction::Approve { channel, code } => {
            // The running orchestrator delivers the approval notice from the outbox.
            match registry.approve_by_code(&channel, &code, None).await? {
                Some(request) => Ok(vec![format!(
                    "Approved {} on {channel}. They will be notified on the next delivery pass.",
                    request.sender_id
                )]),
                None => anyhow::bail!("no pending request with code {code} on {channel}"),
            }
        },
        PairingAction::Reject { channel, sender } => {
            let sender = SenderId::parse(&sender)
                .ok_or_else(|| anyhow::anyhow!("sender must not be empty"))?;
            if registry.reject(&channel, &sender).await? {
                Ok(vec![format!("Rejected pending request from {sender} on {channel}.")])
            } else {
                anyhow::bail!("no pending request from {sender} on {channel}")
            }
        },
    }
}

fn describe(request: &PairingRequest) -> String {
    let created = to_datetime(request.created_at).format("%Y-%m-%d %H:%M UTC");
    let name = request
        .display_name
        .as_deref()
        .map(|n| format!(" ({n})"))
        .unwrap_or_default();
    format!(
        "{}  {}{name}  account={}  created={created}",
        request.code, request.sender_id, request.account_id
    )
}

/// Persisted entries first, then static entries from every account on the
/// channel, marked with the account they come from.
async fn allowlist_lines(
    config: &SwitchboardConfig,
    store: &dyn AllowListStore,
    channel: &str,
) -> Result<Vec<String>> {
    let mut lines: Vec<String> = store.read(channel).await?;
    for (account_channel, account_id, raw) in config.accounts() {
        if !account_channel.trim().eq_ignore_ascii_case(channel) {
            continue;
        }
        let account = ChannelAccountConfig::from_value(raw.clone())
            .map_err(|e| anyhow::anyhow!("channels.{channel}.{account_id}: {e}"))?;
        for entry in &account.allowlist {
            let entry = normalize_identity(entry);
            if !entry.is_empty() {
                lines.push(format!("{entry} (config: {account_id})"));
            }
        }
    }
    if lines.is_empty() {
        lines.push(format!("No allow-list entries on {channel}."));
    }
    Ok(lines)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        switchboard_channels::{MemoryPairingStore, PairingStore, store::PairingMeta},
    };

    fn registry() -> (Arc<MemoryPairingStore>, PairingRegistry) {
        let store = Arc::new(MemoryPairingStore::new());
        (Arc::clone(&store), PairingRegistry::new(store))
    }

    async fn request(store: &MemoryPairingStore, sender: &str) -> String {
        let sender = SenderId::parse(sender).unwrap();
        let meta = PairingMeta {
            account_id: "work".into(),
            display_name: Some("Boss".into()),
            reply_to: None,
        };
        store
            .upsert("email", &sender, meta, "ABCD2345")
            .await
            .unwrap()
            .code
    }

    #[tokio::test]
    async fn list_then_approve_by_code() {
        let (store, registry) = registry();
        let code = request(&store, "boss@x.com").await;

        let lines = run_pairing(&registry, PairingAction::List {
            channel: "email".into(),
        })
        .await
        .unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ABCD2345  boss@x.com (Boss)  account=work"));

        let lines = run_pairing(&registry, PairingAction::Approve {
            channel: "email".into(),
            code: code.to_lowercase(),
        })
        .await
        .unwrap();
        assert!(lines[0].contains("Approved boss@x.com"));
        assert_eq!(store.read("email").await.unwrap(), vec!["boss@x.com"]);

        let lines = run_pairing(&registry, PairingAction::List {
            channel: "email".into(),
        })
        .await
        .unwrap();
        assert_eq!(lines, ["No pending pairing requests on email."]);
    }

    #[tokio::test]
    async fn unknown_code_is_an_error() {
        let (_store, registry) = registry();
        let err = run_pairing(&registry, PairingAction::Approve {
            channel: "email".into(),
            code: "ZZZZ9999".into(),
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("no pending request"));
    }

    #[tokio::test]
    async fn reject_normalizes_sender() {
        let (store, registry) = registry();
        request(&store, "boss@x.com").await;
        let lines = run_pairing(&registry, PairingAction::Reject {
            channel: "email".into(),
            sender: " Boss@X.com ".into(),
        })
        .await
        .unwrap();
        assert!(lines[0].contains("boss@x.com"));
        assert!(registry.list_pending("email").await.unwrap().is_empty());
    }

    #[test]
    fn channel_is_normalized() {
        assert_eq!(parse_channel(" Email ").unwrap(), "email");
        assert!(parse_channel("  ").is_err());
    }

    #[tokio::test]
    async fn allowlist_merges_config_entries() {
        let store = MemoryPairingStore::new();
        store
            .add("email", &SenderId::parse("a@x.com").unwrap())
            .await
            .unwrap();
        let config: SwitchboardConfig = serde_json::from_value(serde_json::json!({
            "channels": {
                "email": { "work": { "allowlist": ["B@X.com", " "] } },
                "chat": { "main": { "allowlist": ["c"] } }
            }
        }))
        .unwrap();

        let lines = allowlist_lines(&config, &store, "email").await.unwrap();
        assert_eq!(lines, ["a@x.com", "b@x.com (config: work)"]);
    }
}
