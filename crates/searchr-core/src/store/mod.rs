//! Index storage abstraction.
//!
//! The [`IndexStore`] trait is the seam between searchr and a full-text
//! engine. Adapters speak in [`StoredDocument`]s, whose field values are
//! plain text exactly as the engine hands them back; typing and decoding
//! happen in the [`IndexManager`](crate::index::IndexManager).
//!
//! Implementations must be `Send + Sync` and safe under concurrent upserts
//! and reads; searchr holds no locks of its own around them.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::SortOrder;
use crate::query::FieldQuery;
use crate::schema::IndexSchema;

/// Engine-facing form of a document: primary key plus text-valued fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: BTreeMap<String, String>,
}

impl StoredDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Paging, projection and ordering for one search call. Field names have
/// already been validated against the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchWindow {
    pub offset: usize,
    pub limit: usize,
    pub fields: Vec<String>,
    pub sort: Option<(String, SortOrder)>,
}

/// One page of engine results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredPage {
    pub total: u64,
    pub docs: Vec<StoredDocument>,
}

/// Result of [`IndexStore::create_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Abstract full-text index backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_index`](IndexStore::create_index) | Create the index if missing |
/// | [`upsert`](IndexStore::upsert) | Insert or fully replace a document by id |
/// | [`get_by_id`](IndexStore::get_by_id) | Point lookup by primary key |
/// | [`search`](IndexStore::search) | Field-scoped text search with paging |
/// | [`retire_superseded`](IndexStore::retire_superseded) | Drop other versions of a key |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Create the index described by `schema`. Must succeed without
    /// changes when an index of the same name already exists.
    async fn create_index(&self, schema: &IndexSchema) -> Result<CreateOutcome>;

    /// Insert `doc`, replacing every field of any document with the same id.
    async fn upsert(&self, schema: &IndexSchema, doc: StoredDocument) -> Result<()>;

    /// Fetch all stored fields of one document.
    async fn get_by_id(&self, schema: &IndexSchema, id: &str) -> Result<Option<StoredDocument>>;

    /// Run `query`, returning only `window.fields` on each document.
    async fn search(
        &self,
        schema: &IndexSchema,
        query: &FieldQuery,
        window: &SearchWindow,
    ) -> Result<StoredPage>;

    /// Delete every document whose `key` field equals `key` and whose id is
    /// not `keep_id`. Returns the number removed.
    async fn retire_superseded(&self, schema: &IndexSchema, key: &str, keep_id: &str)
        -> Result<u64>;
}
