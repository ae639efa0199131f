//! Core data models used throughout searchr.
//!
//! These types describe the documents written to the index, the storage
//! notifications that trigger indexing, and the queries and projected hits
//! that flow back out of the index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One searchable version of a stored object.
///
/// `id` is the version identifier (ETag or content hash) and the index's
/// primary key. The same `key` may appear under many `id`s over time.
/// Timestamps are kept at whole-second precision, which is what the index
/// persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub key: String,
    #[serde(rename = "url")]
    pub locator: String,
    pub body: String,
    pub size: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// The kind of change a storage notification describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationType {
    Created,
    Removed,
    Other(String),
}

impl OperationType {
    /// Parse an S3-style event name such as `s3:ObjectCreated:Put`.
    pub fn from_event_name(name: &str) -> Self {
        let trimmed = name.strip_prefix("s3:").unwrap_or(name);
        if trimmed.starts_with("ObjectCreated") {
            OperationType::Created
        } else if trimmed.starts_with("ObjectRemoved") {
            OperationType::Removed
        } else {
            OperationType::Other(name.to_string())
        }
    }
}

/// One blob-store change. Delivery is at-least-once and unordered, so the
/// same event may be seen several times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub operation: OperationType,
    pub key: String,
    /// Version identifier of the object content (ETag).
    pub id: String,
    pub size: u64,
}

impl NotificationEvent {
    pub fn created(key: impl Into<String>, id: impl Into<String>, size: u64) -> Self {
        Self {
            operation: OperationType::Created,
            key: key.into(),
            id: id.into(),
            size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A body-scoped full-text search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Raw user input. Sanitised by [`crate::query::build_body_query`].
    pub term: String,
    pub offset: usize,
    pub limit: usize,
    /// Stored fields to return on each hit. `id` is always returned.
    pub fields: Vec<String>,
    /// Optional ordering on a sortable field; relevance order otherwise.
    pub sort: Option<(String, SortOrder)>,
}

impl SearchQuery {
    pub const DEFAULT_LIMIT: usize = 10;

    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
            fields: Vec::new(),
            sort: None,
        }
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some((field.into(), order));
        self
    }
}

/// A projected search hit. Only the requested fields are populated, and
/// unpopulated fields are omitted from the serialized form entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "url", skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchPage {
    /// Total number of matches, independent of offset and limit.
    pub total: u64,
    pub hits: Vec<DocumentView>,
}

impl SearchPage {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
