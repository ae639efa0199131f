//! Index schema definition.
//!
//! A schema is an explicit value built once at start-up and handed to the
//! [`IndexManager`](crate::index::IndexManager) and every
//! [`IndexStore`](crate::store::IndexStore) call. Field and index names are
//! restricted to plain identifiers so adapters can splice them into engine
//! DDL without quoting concerns.

use crate::error::{IndexError, Result};

pub const FIELD_BODY: &str = "body";
pub const FIELD_URL: &str = "url";
pub const FIELD_KEY: &str = "key";
pub const FIELD_SIZE: &str = "size";
pub const FIELD_CREATED_AT: &str = "created_at";

/// Default index name.
pub const DEFAULT_INDEX_NAME: &str = "searchr";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text { searchable: bool },
    Numeric { sortable: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Text { searchable: true },
        }
    }

    pub fn numeric(name: &str, sortable: bool) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Numeric { sortable },
        }
    }

    pub fn is_searchable(&self) -> bool {
        matches!(self.kind, FieldKind::Text { searchable: true })
    }

    pub fn is_sortable(&self) -> bool {
        matches!(self.kind, FieldKind::Numeric { sortable: true })
    }
}

/// Named set of fields making up one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    name: String,
    fields: Vec<FieldSpec>,
}

impl IndexSchema {
    /// Build a schema, validating the index and field names.
    pub fn new(name: &str, fields: Vec<FieldSpec>) -> Result<Self> {
        if !is_identifier(name) {
            return Err(IndexError::Schema(format!(
                "index name '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                name
            )));
        }
        if fields.is_empty() {
            return Err(IndexError::Schema("schema has no fields".to_string()));
        }
        for (i, f) in fields.iter().enumerate() {
            if !is_identifier(&f.name) || f.name == "id" {
                return Err(IndexError::Schema(format!(
                    "invalid field name '{}'",
                    f.name
                )));
            }
            if fields[..i].iter().any(|other| other.name == f.name) {
                return Err(IndexError::Schema(format!("duplicate field '{}'", f.name)));
            }
        }
        Ok(Self {
            name: name.to_string(),
            fields,
        })
    }

    /// The document schema: `body`, `url`, `key` as text, `size` as a
    /// sortable number and `created_at` as a number.
    pub fn documents(name: &str) -> Result<Self> {
        Self::new(
            name,
            vec![
                FieldSpec::text(FIELD_BODY),
                FieldSpec::text(FIELD_URL),
                FieldSpec::text(FIELD_KEY),
                FieldSpec::numeric(FIELD_CREATED_AT, false),
                FieldSpec::numeric(FIELD_SIZE, true),
            ],
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Look up a field, failing with [`IndexError::UnknownField`].
    pub fn require(&self, name: &str) -> Result<&FieldSpec> {
        self.field(name)
            .ok_or_else(|| IndexError::UnknownField(name.to_string()))
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
