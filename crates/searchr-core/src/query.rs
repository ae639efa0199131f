//! Search query builder.
//!
//! Turns a raw user term into a [`FieldQuery`] scoped to the `body` field.
//! User text is never spliced into engine syntax: the term is split into
//! literal tokens, and each renderer is responsible for quoting them. The
//! FTS5 renderer emits every token as a double-quoted string, so query
//! operators (`AND`, `OR`, `NOT`, `NEAR`), column filters (`:`), prefix
//! markers (`*`, `^`) and grouping characters are matched as plain text.

use crate::error::{IndexError, Result};
use crate::schema::FIELD_BODY;

/// Longest accepted term, in characters.
pub const MAX_TERM_CHARS: usize = 256;
/// Most literal tokens accepted in one term.
pub const MAX_TOKENS: usize = 32;

/// A conjunction of literal tokens that must all match one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldQuery {
    field: String,
    tokens: Vec<String>,
}

impl FieldQuery {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Render as an SQLite FTS5 `MATCH` expression, e.g.
    /// `body : "report" AND body : "560001"`.
    pub fn to_fts5(&self) -> String {
        self.tokens
            .iter()
            .map(|t| format!("{} : \"{}\"", self.field, t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Evaluate the query against a text value in-process.
    ///
    /// Each token is treated as a phrase: its words must appear
    /// contiguously (case-insensitively) among the words of `text`.
    pub fn matches(&self, text: &str) -> bool {
        let haystack = words(text);
        self.tokens.iter().all(|token| {
            let needle = words(token);
            !needle.is_empty()
                && haystack
                    .windows(needle.len())
                    .any(|window| window == needle.as_slice())
        })
    }
}

/// Build a query matching `term` against the `body` field.
///
/// # Errors
///
/// Returns [`IndexError::InvalidQuery`] when the term is empty, too long,
/// contains control characters, has too many tokens, or has no searchable
/// characters at all.
pub fn build_body_query(term: &str) -> Result<FieldQuery> {
    build_field_query(FIELD_BODY, term)
}

fn build_field_query(field: &str, term: &str) -> Result<FieldQuery> {
    let term = term.trim();
    if term.is_empty() {
        return Err(IndexError::InvalidQuery(
            "search term must not be empty".to_string(),
        ));
    }
    if term.chars().count() > MAX_TERM_CHARS {
        return Err(IndexError::InvalidQuery(format!(
            "search term longer than {} characters",
            MAX_TERM_CHARS
        )));
    }
    if term.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return Err(IndexError::InvalidQuery(
            "search term contains control characters".to_string(),
        ));
    }

    // Tokens made only of punctuation would render as empty phrases.
    let tokens: Vec<String> = term
        .split_whitespace()
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .map(str::to_string)
        .collect();

    if tokens.is_empty() {
        return Err(IndexError::InvalidQuery(
            "search term has no searchable characters".to_string(),
        ));
    }
    if tokens.len() > MAX_TOKENS {
        return Err(IndexError::InvalidQuery(format!(
            "search term has more than {} words",
            MAX_TOKENS
        )));
    }

    Ok(FieldQuery {
        field: field.to_string(),
        tokens,
    })
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}
