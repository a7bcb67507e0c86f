//! Durable stores: minute health samples, job history + audit events, and
//! app settings. SQLite files in WAL mode so readers never block the writer.

use std::path::Path;

use anyhow::Result;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

pub mod history;
pub mod settings;
pub mod stats;
pub mod writer;

pub use history::HistoryStore;
pub use settings::SettingsStore;
pub use stats::StatsStore;
pub use writer::HistoryWriter;

/// Open (and create if needed) a WAL-journaled SQLite database.
pub async fn connect_sqlite(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    Ok(pool)
}
