//! `searchr upload`: put a local file into the configured bucket.
//!
//! Goes through [`BlobStore::put`](crate::storage::BlobStore::put) like
//! `POST /upload`, so a running `searchr serve` indexes it from the
//! resulting notification.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use std::path::Path;

use crate::config::Config;
use crate::server::object_key;
use crate::storage::{self, detect_content_type};

pub async fn run_upload(config: &Config, path: &Path, key: Option<String>) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if data.is_empty() {
        bail!("{} is empty", path.display());
    }
    if data.len() > config.server.max_upload_bytes {
        bail!(
            "{} is {} bytes, over the {} byte upload limit",
            path.display(),
            data.len(),
            config.server.max_upload_bytes
        );
    }

    let raw_key = match key {
        Some(k) => k,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Path has no file name")?,
    };
    let key = object_key(&raw_key)?;

    let blobs = storage::open(&config.storage)?;
    let id = blobs
        .put(&key, Bytes::from(data), detect_content_type(&key))
        .await?;

    println!("Uploaded {} (id {})", key, id);
    println!("url: {}", blobs.locator(&key));
    Ok(())
}
