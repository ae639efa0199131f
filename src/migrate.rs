//! Index bootstrap.
//!
//! Opens the SQLite database, binds the configured schema to an
//! [`IndexManager`], and creates the full-text index if it is missing.
//! Creation is idempotent; any other failure is fatal for the caller.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use searchr_core::store::CreateOutcome;
use searchr_core::IndexManager;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteIndexStore;

/// Open the index without touching its schema.
pub async fn open_index(config: &Config) -> Result<Arc<IndexManager>> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteIndexStore::new(pool));
    Ok(Arc::new(IndexManager::new(store, config.schema()?)))
}

/// Open the index and make sure it exists.
pub async fn init_index(config: &Config) -> Result<Arc<IndexManager>> {
    let index = open_index(config).await?;
    let outcome = index
        .create()
        .await
        .with_context(|| format!("Failed to initialize index '{}'", config.index.name))?;
    match outcome {
        CreateOutcome::Created => info!("Created index '{}'", config.index.name),
        CreateOutcome::AlreadyExists => info!("Index '{}' already exists", config.index.name),
    }
    Ok(index)
}

/// `searchr init`.
pub async fn run_init(config: &Config) -> Result<()> {
    init_index(config).await?;
    println!(
        "Index '{}' ready at {}",
        config.index.name,
        config.index.db_path.display()
    );
    Ok(())
}
