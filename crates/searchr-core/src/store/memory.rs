//! In-memory [`IndexStore`] implementation for tests and local runs.
//!
//! Documents live in a `BTreeMap` per index behind a `std::sync::RwLock`.
//! Text matching uses [`FieldQuery::matches`]; relevance order is simply
//! primary-key order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{IndexError, Result};
use crate::models::SortOrder;
use crate::query::FieldQuery;
use crate::schema::{IndexSchema, FIELD_KEY};

use super::{CreateOutcome, IndexStore, SearchWindow, StoredDocument, StoredPage};

/// In-memory index store.
pub struct InMemoryIndexStore {
    indexes: RwLock<HashMap<String, BTreeMap<String, StoredDocument>>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Number of documents currently held in `index`.
    pub fn len(&self, index: &str) -> usize {
        self.read()
            .map(|idx| idx.get(index).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, BTreeMap<String, StoredDocument>>>> {
        self.indexes
            .read()
            .map_err(|_| IndexError::Transport("index lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<String, BTreeMap<String, StoredDocument>>>> {
        self.indexes
            .write()
            .map_err(|_| IndexError::Transport("index lock poisoned".to_string()))
    }
}

impl Default for InMemoryIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(schema: &IndexSchema) -> IndexError {
    IndexError::Transport(format!("index '{}' does not exist", schema.name()))
}

fn project(doc: &StoredDocument, fields: &[String]) -> StoredDocument {
    let mut out = StoredDocument::new(doc.id.clone());
    for f in fields {
        if let Some(v) = doc.fields.get(f) {
            out.fields.insert(f.clone(), v.clone());
        }
    }
    out
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn create_index(&self, schema: &IndexSchema) -> Result<CreateOutcome> {
        let mut indexes = self.write()?;
        if indexes.contains_key(schema.name()) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        indexes.insert(schema.name().to_string(), BTreeMap::new());
        Ok(CreateOutcome::Created)
    }

    async fn upsert(&self, schema: &IndexSchema, doc: StoredDocument) -> Result<()> {
        let mut indexes = self.write()?;
        let docs = indexes.get_mut(schema.name()).ok_or_else(|| missing(schema))?;
        docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn get_by_id(&self, schema: &IndexSchema, id: &str) -> Result<Option<StoredDocument>> {
        let indexes = self.read()?;
        let docs = indexes.get(schema.name()).ok_or_else(|| missing(schema))?;
        Ok(docs.get(id).cloned())
    }

    async fn search(
        &self,
        schema: &IndexSchema,
        query: &FieldQuery,
        window: &SearchWindow,
    ) -> Result<StoredPage> {
        let indexes = self.read()?;
        let docs = indexes.get(schema.name()).ok_or_else(|| missing(schema))?;

        let mut matched: Vec<&StoredDocument> = docs
            .values()
            .filter(|d| d.get(query.field()).is_some_and(|text| query.matches(text)))
            .collect();

        if let Some((field, order)) = &window.sort {
            let value = |d: &StoredDocument| d.get(field).and_then(|v| v.parse::<i64>().ok());
            matched.sort_by(|a, b| {
                let ord = value(a).cmp(&value(b));
                match order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
        }

        let total = matched.len() as u64;
        let docs = matched
            .into_iter()
            .skip(window.offset)
            .take(window.limit)
            .map(|d| project(d, &window.fields))
            .collect();

        Ok(StoredPage { total, docs })
    }

    async fn retire_superseded(
        &self,
        schema: &IndexSchema,
        key: &str,
        keep_id: &str,
    ) -> Result<u64> {
        let mut indexes = self.write()?;
        let docs = indexes.get_mut(schema.name()).ok_or_else(|| missing(schema))?;
        let before = docs.len();
        docs.retain(|id, d| id == keep_id || d.get(FIELD_KEY) != Some(key));
        Ok((before - docs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::build_body_query;

    fn schema() -> IndexSchema {
        IndexSchema::documents("test").unwrap()
    }

    fn doc(id: &str, key: &str, body: &str, size: &str) -> StoredDocument {
        StoredDocument::new(id)
            .with("key", key)
            .with("body", body)
            .with("size", size)
    }

    fn window(fields: &[&str]) -> SearchWindow {
        SearchWindow {
            offset: 0,
            limit: 10,
            fields: fields.iter().map(|s| s.to_string()).collect(),
            sort: None,
        }
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = InMemoryIndexStore::new();
        assert_eq!(store.create_index(&schema()).await.unwrap(), CreateOutcome::Created);
        assert_eq!(
            store.create_index(&schema()).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn operations_on_missing_index_fail() {
        let store = InMemoryIndexStore::new();
        let err = store.upsert(&schema(), doc("a", "k", "b", "1")).await;
        assert!(matches!(err, Err(IndexError::Transport(_))));
    }

    #[tokio::test]
    async fn search_projects_and_pages() {
        let store = InMemoryIndexStore::new();
        let s = schema();
        store.create_index(&s).await.unwrap();
        store.upsert(&s, doc("a", "a.txt", "alpha shared", "3")).await.unwrap();
        store.upsert(&s, doc("b", "b.txt", "beta shared", "1")).await.unwrap();
        store.upsert(&s, doc("c", "c.txt", "gamma", "2")).await.unwrap();

        let q = build_body_query("shared").unwrap();
        let page = store.search(&s, &q, &window(&["key"])).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.docs.len(), 2);
        assert!(page.docs.iter().all(|d| d.get("body").is_none()));
        assert_eq!(page.docs[0].get("key"), Some("a.txt"));

        let mut w = window(&["key"]);
        w.offset = 1;
        let page = store.search(&s, &q, &w).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.docs.len(), 1);
        assert_eq!(page.docs[0].id, "b");
    }

    #[tokio::test]
    async fn search_sorts_numerically() {
        let store = InMemoryIndexStore::new();
        let s = schema();
        store.create_index(&s).await.unwrap();
        store.upsert(&s, doc("a", "a", "x", "10")).await.unwrap();
        store.upsert(&s, doc("b", "b", "x", "9")).await.unwrap();
        store.upsert(&s, doc("c", "c", "x", "100")).await.unwrap();

        let q = build_body_query("x").unwrap();
        let mut w = window(&["size"]);
        w.sort = Some(("size".to_string(), SortOrder::Desc));
        let page = store.search(&s, &q, &w).await.unwrap();
        let ids: Vec<&str> = page.docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn retire_superseded_keeps_current_version() {
        let store = InMemoryIndexStore::new();
        let s = schema();
        store.create_index(&s).await.unwrap();
        store.upsert(&s, doc("v1", "report.pdf", "old", "1")).await.unwrap();
        store.upsert(&s, doc("v2", "report.pdf", "new", "1")).await.unwrap();
        store.upsert(&s, doc("o1", "other.pdf", "other", "1")).await.unwrap();

        let removed = store.retire_superseded(&s, "report.pdf", "v2").await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_by_id(&s, "v1").await.unwrap().is_none());
        assert!(store.get_by_id(&s, "v2").await.unwrap().is_some());
        assert!(store.get_by_id(&s, "o1").await.unwrap().is_some());
    }
}
