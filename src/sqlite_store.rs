//! SQLite FTS5-backed [`IndexStore`] implementation.
//!
//! Each [`IndexSchema`] maps to a plain content table named after the
//! schema, keyed by a unique `id`, and an external-content FTS5 table
//! (`<name>_fts`) over the searchable fields. Triggers on the content table
//! keep the FTS index in step, so writes only ever touch the content table
//! and lookups by `id` or `key` go through ordinary B-tree indexes.
//!
//! Field columns are declared without a type so values are stored exactly
//! as bound. All columns are read back with `CAST(... AS TEXT)`; typing the
//! values is left to the [`IndexManager`](searchr_core::IndexManager).

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use searchr_core::error::{IndexError, Result};
use searchr_core::models::SortOrder;
use searchr_core::query::FieldQuery;
use searchr_core::schema::{IndexSchema, FIELD_KEY};
use searchr_core::store::{
    CreateOutcome, IndexStore, SearchWindow, StoredDocument, StoredPage,
};

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteIndexStore {
    pool: SqlitePool,
}

impl SqliteIndexStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(transport)
    }

    async fn index_exists(&self, schema: &IndexSchema) -> Result<bool> {
        Ok(self.table_exists(schema.name()).await?
            && self.table_exists(&fts_table(schema)).await?)
    }
}

fn transport(e: sqlx::Error) -> IndexError {
    IndexError::Transport(e.to_string())
}

/// Integer key shared by the content table and the FTS index.
const ROWID_COLUMN: &str = "rid";

fn fts_table(schema: &IndexSchema) -> String {
    format!("{}_fts", schema.name())
}

/// Content table, key index, FTS table and sync triggers, in creation order.
fn schema_ddl(schema: &IndexSchema) -> Vec<String> {
    let table = schema.name();
    let fts = fts_table(schema);
    let columns = schema.field_names().collect::<Vec<_>>().join(", ");
    let searchable: Vec<&str> = schema
        .fields()
        .iter()
        .filter(|f| f.is_searchable())
        .map(|f| f.name.as_str())
        .collect();
    let fts_columns = searchable.join(", ");
    let new_values = searchable
        .iter()
        .map(|f| format!("new.{f}"))
        .collect::<Vec<_>>()
        .join(", ");
    let old_values = searchable
        .iter()
        .map(|f| format!("old.{f}"))
        .collect::<Vec<_>>()
        .join(", ");

    let insert_new =
        format!("INSERT INTO {fts} (rowid, {fts_columns}) VALUES (new.{ROWID_COLUMN}, {new_values});");
    let delete_old = format!(
        "INSERT INTO {fts} ({fts}, rowid, {fts_columns}) VALUES ('delete', old.{ROWID_COLUMN}, {old_values});"
    );

    let mut ddl = vec![format!(
        "CREATE TABLE IF NOT EXISTS {table} \
         ({ROWID_COLUMN} INTEGER PRIMARY KEY, id TEXT NOT NULL UNIQUE, {columns})"
    )];
    if schema.field(FIELD_KEY).is_some() {
        ddl.push(format!(
            "CREATE INDEX IF NOT EXISTS {table}_{FIELD_KEY} ON {table} ({FIELD_KEY})"
        ));
    }
    ddl.push(format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5({fts_columns}, \
         content='{table}', content_rowid='{ROWID_COLUMN}')"
    ));
    ddl.push(format!(
        "CREATE TRIGGER IF NOT EXISTS {table}_ai AFTER INSERT ON {table} BEGIN {insert_new} END"
    ));
    ddl.push(format!(
        "CREATE TRIGGER IF NOT EXISTS {table}_ad AFTER DELETE ON {table} BEGIN {delete_old} END"
    ));
    ddl.push(format!(
        "CREATE TRIGGER IF NOT EXISTS {table}_au AFTER UPDATE ON {table} \
         BEGIN {delete_old} {insert_new} END"
    ));
    ddl
}

/// `d.id AS id, CAST(d.a AS TEXT) AS a, ...` for the given field names,
/// read from the content table aliased as `d`. Names come from a validated
/// schema, so they are plain identifiers.
fn select_list<'a>(fields: impl Iterator<Item = &'a str>) -> String {
    std::iter::once("d.id AS id".to_string())
        .chain(fields.map(|f| format!("CAST(d.{f} AS TEXT) AS {f}")))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_document<'a>(
    row: &sqlx::sqlite::SqliteRow,
    fields: impl Iterator<Item = &'a str>,
) -> Result<StoredDocument> {
    let mut doc = StoredDocument::new(row.try_get::<String, _>("id").map_err(transport)?);
    for f in fields {
        let value: Option<String> = row.try_get(f).map_err(transport)?;
        if let Some(v) = value {
            doc.fields.insert(f.to_string(), v);
        }
    }
    Ok(doc)
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn create_index(&self, schema: &IndexSchema) -> Result<CreateOutcome> {
        if self.index_exists(schema).await? {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let init_err = |reason: String| IndexError::Init {
            index: schema.name().to_string(),
            reason,
        };
        if schema.field(ROWID_COLUMN).is_some() {
            return Err(init_err(format!("field name '{ROWID_COLUMN}' is reserved")));
        }
        if !schema.fields().iter().any(|f| f.is_searchable()) {
            return Err(init_err("schema has no searchable fields".to_string()));
        }

        let created = async {
            let mut tx = self.pool.begin().await?;
            for stmt in schema_ddl(schema) {
                sqlx::query(&stmt).execute(&mut *tx).await?;
            }
            tx.commit().await
        }
        .await;

        if let Err(e) = created {
            // Lost a race with another creator.
            if self.index_exists(schema).await? {
                return Ok(CreateOutcome::AlreadyExists);
            }
            return Err(init_err(e.to_string()));
        }
        Ok(CreateOutcome::Created)
    }

    /// One autocommit statement: the write lock is requested up front, so
    /// concurrent writers wait on the busy timeout instead of failing.
    async fn upsert(&self, schema: &IndexSchema, doc: StoredDocument) -> Result<()> {
        let names: Vec<&str> = schema.field_names().collect();
        let updates = names
            .iter()
            .map(|f| format!("{f} = excluded.{f}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} (id, {}) VALUES (?{}) ON CONFLICT(id) DO UPDATE SET {}",
            schema.name(),
            names.join(", "),
            ", ?".repeat(names.len()),
            updates
        );

        let mut q = sqlx::query(&sql).bind(&doc.id);
        for name in &names {
            q = q.bind(doc.fields.get(*name).cloned());
        }
        q.execute(&self.pool).await.map_err(transport)?;
        Ok(())
    }

    async fn get_by_id(&self, schema: &IndexSchema, id: &str) -> Result<Option<StoredDocument>> {
        let sql = format!(
            "SELECT {} FROM {} AS d WHERE d.id = ?",
            select_list(schema.field_names()),
            schema.name()
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(transport)?;

        row.map(|r| row_to_document(&r, schema.field_names()))
            .transpose()
    }

    async fn search(
        &self,
        schema: &IndexSchema,
        query: &FieldQuery,
        window: &SearchWindow,
    ) -> Result<StoredPage> {
        schema.require(query.field())?;
        for f in &window.fields {
            schema.require(f)?;
        }

        let table = schema.name();
        let fts = fts_table(schema);
        let expr = query.to_fts5();

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {fts} WHERE {fts} MATCH ?"
        ))
        .bind(&expr)
        .fetch_one(&self.pool)
        .await
        .map_err(transport)?;

        let order = match &window.sort {
            Some((field, order)) => {
                schema.require(field)?;
                let dir = match order {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                format!("CAST(d.{field} AS INTEGER) {dir}, d.id ASC")
            }
            None => format!("{fts}.rank, d.id ASC"),
        };

        let sql = format!(
            "SELECT {} FROM {fts} JOIN {table} AS d ON d.{ROWID_COLUMN} = {fts}.rowid \
             WHERE {fts} MATCH ? ORDER BY {order} LIMIT ? OFFSET ?",
            select_list(window.fields.iter().map(String::as_str)),
        );
        let rows = sqlx::query(&sql)
            .bind(&expr)
            .bind(i64::try_from(window.limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(window.offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(transport)?;

        let docs = rows
            .iter()
            .map(|r| row_to_document(r, window.fields.iter().map(String::as_str)))
            .collect::<Result<Vec<_>>>()?;

        Ok(StoredPage {
            total: total.max(0) as u64,
            docs,
        })
    }

    async fn retire_superseded(
        &self,
        schema: &IndexSchema,
        key: &str,
        keep_id: &str,
    ) -> Result<u64> {
        schema.require(FIELD_KEY)?;
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE {} = ? AND id != ?",
            schema.name(),
            FIELD_KEY
        ))
        .bind(key)
        .bind(keep_id)
        .execute(&self.pool)
        .await
        .map_err(transport)?;
        Ok(result.rows_affected())
    }
}
