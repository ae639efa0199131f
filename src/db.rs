//! SQLite database connection management.
//!
//! Provides a connection pool to the SQLite database that backs the
//! full-text index. WAL mode is enabled so that searches from the HTTP
//! server can run while ingestion workers write. The database file and its
//! parent directories are created automatically if they don't exist.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

/// Create a connection pool to the configured SQLite database.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    connect_path(&config.index.db_path).await
}

/// Create a connection pool to the SQLite database at `db_path`.
///
/// Concurrent ingestion workers all write through this pool, so a busy
/// timeout is set to queue writers instead of failing with `SQLITE_BUSY`.
pub async fn connect_path(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
