//! Index manager: schema lifecycle, upsert, point lookup and search.
//!
//! The manager owns the [`IndexSchema`] and translates between typed
//! [`IndexedDocument`]s and the text-valued [`StoredDocument`]s that index
//! engines deal in. Numeric fields come back from engines as text and are
//! decoded here; a value that does not parse is reported as
//! [`IndexError::DataCorruption`] instead of being coerced.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{IndexError, Result};
use crate::models::{DocumentView, IndexedDocument, SearchPage, SearchQuery};
use crate::query::build_body_query;
use crate::schema::{
    IndexSchema, FIELD_BODY, FIELD_CREATED_AT, FIELD_KEY, FIELD_SIZE, FIELD_URL,
};
use crate::store::{CreateOutcome, IndexStore, SearchWindow, StoredDocument};

/// Typed front for an [`IndexStore`] bound to one schema.
pub struct IndexManager {
    store: Arc<dyn IndexStore>,
    schema: IndexSchema,
}

impl IndexManager {
    pub fn new(store: Arc<dyn IndexStore>, schema: IndexSchema) -> Self {
        Self { store, schema }
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    /// Create the index if it does not exist yet.
    ///
    /// Succeeds without side effects when the index is already there. Any
    /// other failure is reported as [`IndexError::Init`], which callers treat
    /// as fatal at start-up.
    pub async fn create(&self) -> Result<CreateOutcome> {
        self.store
            .create_index(&self.schema)
            .await
            .map_err(|e| match e {
                IndexError::Init { .. } => e,
                other => IndexError::Init {
                    index: self.schema.name().to_string(),
                    reason: other.to_string(),
                },
            })
    }

    /// Upsert `doc` by id. Replaces every field of an existing document.
    pub async fn save(&self, doc: &IndexedDocument) -> Result<()> {
        self.store.upsert(&self.schema, encode(doc)).await
    }

    /// Point lookup by id. `Ok(None)` when absent.
    pub async fn get(&self, id: &str) -> Result<Option<IndexedDocument>> {
        match self.store.get_by_id(&self.schema, id).await? {
            Some(stored) => decode_full(&stored).map(Some),
            None => Ok(None),
        }
    }

    /// Body-scoped search with projection and paging.
    ///
    /// Returns an empty page, not an error, when nothing matches.
    pub async fn find(&self, query: &SearchQuery) -> Result<SearchPage> {
        let field_query = build_body_query(&query.term)?;

        for f in &query.fields {
            self.schema.require(f)?;
        }
        if let Some((field, _)) = &query.sort {
            if !self.schema.require(field)?.is_sortable() {
                return Err(IndexError::InvalidQuery(format!(
                    "field '{}' is not sortable",
                    field
                )));
            }
        }

        if query.limit == 0 {
            return Ok(SearchPage::default());
        }

        let window = SearchWindow {
            offset: query.offset,
            limit: query.limit,
            fields: query.fields.clone(),
            sort: query.sort.clone(),
        };
        let page = self.store.search(&self.schema, &field_query, &window).await?;

        let hits = page
            .docs
            .iter()
            .map(|d| decode_view(d, &query.fields))
            .collect::<Result<Vec<_>>>()?;

        Ok(SearchPage {
            total: page.total,
            hits,
        })
    }

    /// Remove other versions stored under `key`, keeping `keep_id`.
    pub async fn retire_superseded(&self, key: &str, keep_id: &str) -> Result<u64> {
        self.store
            .retire_superseded(&self.schema, key, keep_id)
            .await
    }
}

fn encode(doc: &IndexedDocument) -> StoredDocument {
    StoredDocument::new(doc.id.clone())
        .with(FIELD_KEY, doc.key.clone())
        .with(FIELD_URL, doc.locator.clone())
        .with(FIELD_BODY, doc.body.clone())
        .with(FIELD_SIZE, doc.size.to_string())
        .with(FIELD_CREATED_AT, doc.created_at.timestamp().to_string())
}

fn corrupt(doc: &StoredDocument, field: &str, value: &str) -> IndexError {
    IndexError::DataCorruption {
        id: doc.id.clone(),
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn required<'a>(doc: &'a StoredDocument, field: &str) -> Result<&'a str> {
    doc.get(field).ok_or_else(|| corrupt(doc, field, "<missing>"))
}

fn decode_size(doc: &StoredDocument, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| corrupt(doc, FIELD_SIZE, raw))
}

fn decode_timestamp(doc: &StoredDocument, raw: &str) -> Result<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| corrupt(doc, FIELD_CREATED_AT, raw))
}

fn decode_full(doc: &StoredDocument) -> Result<IndexedDocument> {
    Ok(IndexedDocument {
        id: doc.id.clone(),
        key: required(doc, FIELD_KEY)?.to_string(),
        locator: required(doc, FIELD_URL)?.to_string(),
        body: required(doc, FIELD_BODY)?.to_string(),
        size: decode_size(doc, required(doc, FIELD_SIZE)?)?,
        created_at: decode_timestamp(doc, required(doc, FIELD_CREATED_AT)?)?,
    })
}

fn decode_view(doc: &StoredDocument, fields: &[String]) -> Result<DocumentView> {
    let wanted = |name: &str| fields.iter().any(|f| f == name);
    let text = |name: &str| {
        if wanted(name) {
            doc.get(name).map(str::to_string)
        } else {
            None
        }
    };

    let size = match doc.get(FIELD_SIZE) {
        Some(raw) if wanted(FIELD_SIZE) => Some(decode_size(doc, raw)?),
        _ => None,
    };
    let created_at = match doc.get(FIELD_CREATED_AT) {
        Some(raw) if wanted(FIELD_CREATED_AT) => Some(decode_timestamp(doc, raw)?),
        _ => None,
    };

    Ok(DocumentView {
        id: doc.id.clone(),
        key: text(FIELD_KEY),
        locator: text(FIELD_URL),
        body: text(FIELD_BODY),
        size,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryIndexStore;
    use chrono::TimeZone;

    fn manager() -> (Arc<InMemoryIndexStore>, IndexManager) {
        let store = Arc::new(InMemoryIndexStore::new());
        let schema = IndexSchema::documents("test").unwrap();
        let manager = IndexManager::new(store.clone(), schema);
        (store, manager)
    }

    fn document(id: &str, key: &str, body: &str, size: u64) -> IndexedDocument {
        IndexedDocument {
            id: id.to_string(),
            key: key.to_string(),
            locator: format!("http://localhost:9000/searchr/{}", key),
            body: body.to_string(),
            size,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn create_twice_succeeds() {
        let (_, m) = manager();
        assert_eq!(m.create().await.unwrap(), CreateOutcome::Created);
        assert_eq!(m.create().await.unwrap(), CreateOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn save_twice_leaves_one_equal_document() {
        let (store, m) = manager();
        m.create().await.unwrap();
        let d = document("etag-1", "a.pdf", "hello world", 11);

        m.save(&d).await.unwrap();
        m.save(&d).await.unwrap();

        assert_eq!(store.len("test"), 1);
        assert_eq!(m.get("etag-1").await.unwrap(), Some(d));
    }

    #[tokio::test]
    async fn save_replaces_all_fields() {
        let (_, m) = manager();
        m.create().await.unwrap();
        m.save(&document("etag-1", "a.pdf", "first", 5)).await.unwrap();
        let replacement = document("etag-1", "b.pdf", "second", 6);
        m.save(&replacement).await.unwrap();
        assert_eq!(m.get("etag-1").await.unwrap(), Some(replacement));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let (_, m) = manager();
        m.create().await.unwrap();
        assert_eq!(m.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn find_returns_empty_page_when_nothing_matches() {
        let (_, m) = manager();
        m.create().await.unwrap();
        m.save(&document("etag-1", "a.pdf", "hello", 5)).await.unwrap();
        let page = m.find(&SearchQuery::new("absent")).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn find_projection_never_includes_body() {
        let (_, m) = manager();
        m.create().await.unwrap();
        m.save(&document("etag-1", "a.pdf", "pin 560001", 5)).await.unwrap();

        let page = m
            .find(&SearchQuery::new("560001").fields(["key", "size"]))
            .await
            .unwrap();
        assert_eq!(page.hits.len(), 1);
        let hit = &page.hits[0];
        assert_eq!(hit.key.as_deref(), Some("a.pdf"));
        assert_eq!(hit.size, Some(5));
        assert!(hit.body.is_none());
        assert!(hit.locator.is_none());
    }

    #[tokio::test]
    async fn find_rejects_unknown_projection_and_unsortable_sort() {
        let (_, m) = manager();
        m.create().await.unwrap();
        let err = m.find(&SearchQuery::new("x").fields(["title"])).await;
        assert!(matches!(err, Err(IndexError::UnknownField(_))));

        let err = m
            .find(&SearchQuery::new("x").sort_by("key", crate::models::SortOrder::Asc))
            .await;
        assert!(matches!(err, Err(IndexError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn find_rejects_blank_term() {
        let (_, m) = manager();
        m.create().await.unwrap();
        m.save(&document("etag-1", "a.pdf", "hello", 5)).await.unwrap();
        for term in ["", "   ", "* : ()"] {
            let err = m.find(&SearchQuery::new(term)).await;
            assert!(matches!(err, Err(IndexError::InvalidQuery(_))), "term {:?}", term);
        }
    }

    #[tokio::test]
    async fn find_with_zero_limit_is_empty() {
        let (_, m) = manager();
        m.create().await.unwrap();
        m.save(&document("etag-1", "a.pdf", "hello", 5)).await.unwrap();
        let page = m.find(&SearchQuery::new("hello").limit(0)).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn corrupt_numeric_field_is_reported() {
        let (store, m) = manager();
        m.create().await.unwrap();
        let raw = StoredDocument::new("bad")
            .with("key", "a.pdf")
            .with("url", "u")
            .with("body", "text 560001")
            .with("size", "twelve")
            .with("created_at", "1700000000");
        store.upsert(m.schema(), raw).await.unwrap();

        let err = m.get("bad").await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::DataCorruption { ref field, ref value, .. } if field == "size" && value == "twelve"
        ));

        let err = m
            .find(&SearchQuery::new("560001").fields(["size"]))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DataCorruption { .. }));

        // Not projected, so not decoded.
        let page = m
            .find(&SearchQuery::new("560001").fields(["key"]))
            .await
            .unwrap();
        assert_eq!(page.hits.len(), 1);
    }

    #[tokio::test]
    async fn missing_required_field_is_corruption() {
        let (store, m) = manager();
        m.create().await.unwrap();
        store
            .upsert(m.schema(), StoredDocument::new("partial").with("key", "a"))
            .await
            .unwrap();
        assert!(matches!(
            m.get("partial").await,
            Err(IndexError::DataCorruption { .. })
        ));
    }
}
