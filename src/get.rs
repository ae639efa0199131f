//! Document retrieval by id.
//!
//! Used by the `searchr get` command; `GET /documents/{id}` goes through
//! the same [`IndexManager::get`](searchr_core::IndexManager::get).

use anyhow::{bail, Result};
use searchr_core::IndexedDocument;

use crate::config::Config;
use crate::migrate;

/// Fetch one indexed version, failing when it does not exist.
pub async fn get_document(config: &Config, id: &str) -> Result<IndexedDocument> {
    let index = migrate::open_index(config).await?;
    match index.get(id).await? {
        Some(doc) => Ok(doc),
        None => bail!("document not found: {}", id),
    }
}

/// CLI entry point: calls [`get_document`] and prints to stdout.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let doc = get_document(config, id).await?;
    print!("{}", format_document(&doc));
    Ok(())
}

fn format_document(doc: &IndexedDocument) -> String {
    format!(
        "--- Document ---\n\
         id:         {}\n\
         key:        {}\n\
         url:        {}\n\
         size:       {} bytes\n\
         created_at: {}\n\
         \n\
         --- Body ---\n\
         {}\n",
        doc.id,
        doc.key,
        doc.locator,
        doc.size,
        doc.created_at.format("%Y-%m-%dT%H:%M:%SZ"),
        doc.body
    )
}
