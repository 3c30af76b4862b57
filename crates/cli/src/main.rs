mod config_commands;
mod db_commands;
mod pairing_commands;

use std::path::{Path, PathBuf};

use {
    clap::{Parser, Subcommand},
    switchboard_config::SwitchboardConfig,
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "switchboard", about = "Switchboard: channel admission and pairing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of the discovered one.
    #[arg(long, global = true, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pending pairing requests.
    Pairing {
        #[command(subcommand)]
        action: pairing_commands::PairingAction,
    },
    /// Approved senders.
    Allowlist {
        #[command(subcommand)]
        action: pairing_commands::AllowlistAction,
    },
    /// Configuration checks.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Database management.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Load the explicit config file, or discover one.
fn load_config(path: Option<&Path>) -> anyhow::Result<SwitchboardConfig> {
    match path {
        Some(path) => switchboard_config::load_config(path),
        None => Ok(switchboard_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "switchboard starting");

    match cli.command {
        Commands::Pairing { action } => {
            let config = load_config(cli.config.as_deref())?;
            pairing_commands::handle_pairing(&config, action).await
        },
        Commands::Allowlist { action } => {
            let config = load_config(cli.config.as_deref())?;
            pairing_commands::handle_allowlist(&config, action).await
        },
        Commands::Config { action } => {
            config_commands::handle_config(cli.config.as_deref(), action)
        },
        Commands::Db { action } => {
            let config = load_config(cli.config.as_deref())?;
            db_commands::handle_db(&config, action).await
        },
    }
}
