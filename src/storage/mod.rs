//! Blob storage abstraction.
//!
//! The [`BlobStore`] trait is the seam between searchr and the object store
//! that holds uploaded files. Two adapters ship with the crate:
//!
//! | Adapter | Backend |
//! |---------|---------|
//! | [`s3::S3BlobStore`] | Amazon S3 and S3-compatible services (MinIO) |
//! | [`memory::InMemoryBlobStore`] | Process-local map, for tests and demos |
//!
//! Change notifications are exposed through [`BlobStore::subscribe`] as a
//! stream of [`NotificationEvent`]s. Delivery is at-least-once with no
//! ordering guarantee; consumers must be idempotent.

pub mod memory;
pub mod s3;
mod sigv4;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::sync::Arc;
use thiserror::Error;

use searchr_core::models::NotificationEvent;

use crate::config::{StorageBackend, StorageConfig};

/// Object content, streamed.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Change notifications from [`BlobStore::subscribe`].
pub type EventStream = BoxStream<'static, Result<NotificationEvent, StorageError>>;

/// Errors raised by blob store adapters.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Network or I/O failure reaching the store.
    #[error("storage transport error: {0}")]
    Transport(String),

    #[error("object not found: {0}")]
    NotFound(String),

    /// The store answered with a non-success HTTP status.
    #[error("storage request failed (HTTP {status}): {message}")]
    Status { status: u16, message: String },

    /// The store answered with something we could not parse.
    #[error("malformed storage response: {0}")]
    Protocol(String),

    /// The adapter cannot perform this operation.
    #[error("unsupported storage operation: {0}")]
    Unsupported(String),

    #[error("storage credentials: {0}")]
    Credentials(String),

    #[error("invalid event filter '{0}'")]
    Filter(String),
}

/// Listing entry for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    /// Entity tag (version identifier), without surrounding quotes.
    pub etag: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Object store capability used by the upload path and the ingestion
/// pipeline.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `content` under `key`, returning the new version identifier.
    async fn put(&self, key: &str, content: Bytes, content_type: &str)
        -> Result<String, StorageError>;

    /// Stream the content stored under `key`.
    async fn get(&self, key: &str) -> Result<ByteStream, StorageError>;

    /// List every object in the bucket.
    async fn list(&self) -> Result<Vec<ObjectInfo>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Subscribe to change notifications whose event names match any of
    /// `filters` (e.g. `s3:ObjectCreated:*`). The stream ends when the
    /// underlying connection does.
    async fn subscribe(&self, filters: &[String]) -> Result<EventStream, StorageError>;

    /// Address from which the object under `key` can be retrieved.
    fn locator(&self, key: &str) -> String;
}

/// Build the blob store selected by `[storage].backend`.
pub fn open(config: &StorageConfig) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config.backend {
        StorageBackend::S3 => Ok(Arc::new(s3::S3BlobStore::new(config)?)),
        StorageBackend::Memory => {
            let bucket = if config.bucket.is_empty() {
                "searchr"
            } else {
                config.bucket.as_str()
            };
            Ok(Arc::new(memory::InMemoryBlobStore::new(bucket)))
        }
    }
}

/// Matches S3 event names against wildcard filters such as
/// `s3:ObjectCreated:*`.
#[derive(Debug, Clone)]
pub struct EventFilter {
    set: GlobSet,
}

impl EventFilter {
    pub fn new(filters: &[String]) -> Result<Self, StorageError> {
        let mut builder = GlobSetBuilder::new();
        for f in filters {
            builder.add(Glob::new(f).map_err(|_| StorageError::Filter(f.clone()))?);
        }
        let set = builder
            .build()
            .map_err(|e| StorageError::Filter(e.to_string()))?;
        Ok(Self { set })
    }

    pub fn matches(&self, event_name: &str) -> bool {
        self.set.is_match(event_name)
    }
}

/// Build a [`GlobSet`] from a list of glob pattern strings.
pub fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Detect MIME content type from a key's file extension.
pub fn detect_content_type(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" => "text/markdown",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "yaml" | "yml" => "text/yaml",
        "rst" => "text/x-rst",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
