use std::path::PathBuf;

use {clap::Subcommand, sqlx::SqlitePool, switchboard_config::SwitchboardConfig, tracing::info};

#[derive(Subcommand)]
pub enum DbAction {
    /// Run all pending database migrations.
    Migrate,
    /// Delete the database file (and its WAL/SHM companions).
    Reset,
}

pub async fn handle_db(config: &SwitchboardConfig, action: DbAction) -> anyhow::Result<()> {
    match action {
        DbAction::Migrate => {
            let pool = open_pool(config).await?;
            pool.close().await;
            println!("Migrations complete.");
            Ok(())
        },
        DbAction::Reset => reset(config),
    }
}

fn db_path(config: &SwitchboardConfig) -> PathBuf {
    config
        .data_dir
        .clone()
        .unwrap_or_else(switchboard_config::data_dir)
        .join("switchboard.db")
}

/// Connect to the configured database and bring its schema up to date.
///
/// The data directory is created when no explicit `database_url` is set.
pub async fn open_pool(config: &SwitchboardConfig) -> anyhow::Result<SqlitePool> {
    let path = db_path(config);
    if config.database_url.is_none()
        && let Some(dir) = path.parent()
    {
        std::fs::create_dir_all(dir)?;
    }
    let pool = SqlitePool::connect(&config.database_url()).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run every crate's migrations against one pool. Sessions go first.
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    switchboard_sessions::run_migrations(pool).await?;
    switchboard_channels::run_migrations(pool).await?;
    info!("database migrations applied");
    Ok(())
}

fn reset(config: &SwitchboardConfig) -> anyhow::Result<()> {
    if config.database_url.is_some() {
        anyhow::bail!("reset only manages the default database; remove `database_url` first");
    }
    let base = db_path(config);
    let mut deleted = false;
    for suffix in ["", "-wal", "-shm"] {
        let path = PathBuf::from(format!("{}{suffix}", base.display()));
        if path.exists() {
            std::fs::remove_file(&path)?;
            println!("Deleted: {}", path.display());
            deleted = true;
        }
    }
    if deleted {
        println!("Database deleted. Run `switchboard db migrate` to recreate it.");
    } else {
        println!("No database file found.");
    }
    Ok(())
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> SwitchboardConfig {
        SwitchboardConfig {
            data_dir: Some(dir.path().join("state")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn migrate_creates_schema_then_reset_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);

        let pool = open_pool(&config).await.unwrap();
        // Migrations are idempotent.
        migrate(&pool).await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        for expected in ["allow_from", "channel_sessions", "message_log", "pairing_requests"] {
            assert!(names.contains(&expected), "missing {expected}: {names:?}");
        }
        pool.close().await;

        assert!(db_path(&config).exists());
        reset(&config).unwrap();
        assert!(!db_path(&config).exists());
    }

    #[test]
    fn reset_refuses_explicit_url() {
        let config = SwitchboardConfig {
            database_url: Some("sqlite::memory:".into()),
            ..Default::default()
        };
        assert!(reset(&config).is_err());
    }
}
