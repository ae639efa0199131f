//! `searchr search`: body search from the command line.
//!
//! Runs the same [`IndexManager::find`](searchr_core::IndexManager::find)
//! path as `GET /search` and prints one block per hit. When `body` is
//! among the projected fields a short single-line excerpt is shown.

use anyhow::{bail, Result};
use searchr_core::{DocumentView, SearchQuery, SortOrder};

use crate::config::Config;
use crate::migrate;

const EXCERPT_CHARS: usize = 160;

/// Default projection when `--fields` is not given.
pub const DEFAULT_FIELDS: [&str; 3] = ["key", "size", "url"];

pub struct SearchArgs {
    pub term: String,
    pub offset: usize,
    pub limit: usize,
    pub fields: Vec<String>,
    /// `size`, `size:asc` or `size:desc`.
    pub sort: Option<String>,
}

/// Blank or unsearchable terms are rejected by the index, as over HTTP.
pub async fn run_search(config: &Config, args: SearchArgs) -> Result<()> {
    let fields = if args.fields.is_empty() {
        DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect()
    } else {
        args.fields
    };
    let mut query = SearchQuery::new(args.term)
        .offset(args.offset)
        .limit(args.limit)
        .fields(fields);
    if let Some(sort_arg) = args.sort.as_deref() {
        let (field, order) = parse_sort(sort_arg)?;
        query = query.sort_by(field, order);
    }

    let index = migrate::open_index(config).await?;
    let page = index.find(&query).await?;

    if page.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in page.hits.iter().enumerate() {
        print!("{}", format_hit(args.offset + i + 1, hit));
    }
    println!(
        "Showing {}-{} of {}",
        args.offset + 1,
        args.offset + page.hits.len(),
        page.total
    );
    Ok(())
}

/// Parse `field[:asc|:desc]`.
pub fn parse_sort(arg: &str) -> Result<(String, SortOrder)> {
    let (field, order) = match arg.split_once(':') {
        Some((f, o)) => (f, o),
        None => (arg, "asc"),
    };
    let order = match order.to_ascii_lowercase().as_str() {
        "asc" => SortOrder::Asc,
        "desc" => SortOrder::Desc,
        other => bail!("Unknown sort order: {}. Use asc or desc.", other),
    };
    Ok((field.to_string(), order))
}

fn format_hit(rank: usize, hit: &DocumentView) -> String {
    let mut out = format!("{}. {}\n", rank, hit.key.as_deref().unwrap_or("(no key)"));
    if let Some(size) = hit.size {
        out.push_str(&format!("    size: {} bytes\n", size));
    }
    if let Some(ref url) = hit.locator {
        out.push_str(&format!("    url: {}\n", url));
    }
    if let Some(created_at) = hit.created_at {
        out.push_str(&format!("    indexed: {}\n", created_at.format("%Y-%m-%d %H:%M:%S")));
    }
    if let Some(ref body) = hit.body {
        let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
        let excerpt: String = flat.chars().take(EXCERPT_CHARS).collect();
        let ellipsis = if flat.chars().count() > EXCERPT_CHARS { "..." } else { "" };
        out.push_str(&format!("    excerpt: \"{}{}\"\n", excerpt, ellipsis));
    }
    out.push_str(&format!("    id: {}\n\n", hit.id));
    out
}
