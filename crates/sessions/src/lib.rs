//! Session continuity storage.
//!
//! A channel conversation is identified by a deterministic [`SessionKey`]
//! derived from the channel, account, sender and (optionally) thread. Each
//! key owns one [`SessionRecord`] whose `updated_at` lets the next inbound
//! message know how long ago the previous turn happened.

pub mod error;
pub mod key;
pub mod sqlite;
pub mod store;

pub use {
    error::{Error, Result},
    key::SessionKey,
    sqlite::SqliteSessionStore,
    store::{MemorySessionStore, SessionRecord, SessionStore},
};

/// Run database migrations for the sessions crate.
///
/// Creates the `channel_sessions` table.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
