//! # searchr
//!
//! Full-text search over documents kept in an S3-compatible blob store.
//!
//! Uploads land in the bucket; the bucket's change notifications drive a
//! worker pool that downloads each new object version, extracts its text
//! (Apache Tika or the built-in extractors) and saves it into a SQLite FTS5
//! index. Search and retrieval are served over HTTP and the CLI.
//!
//! ## Architecture
//!
//! ```text
//!  POST /upload ──▶┌────────────┐  notifications  ┌──────────┐
//!                  │ Blob store │────────────────▶│ Watcher  │
//!                  │ S3 / MinIO │                 └────┬─────┘
//!                  └─────┬──────┘                      ▼
//!                        │ fetch             ┌───────────────────┐
//!                        └──────────────────▶│ Pipeline workers  │
//!                                            │ fetch→extract→save│
//!                                            └────────┬──────────┘
//!                                                     ▼
//!                                   ┌──────────┐  ┌──────────┐
//!             GET /search ─────────▶│  Index   │◀─│  Tika /  │
//!             GET /documents/{id}   │ SQLite   │  │ builtin  │
//!                                   └──────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! searchr init                     # create the index
//! searchr serve                    # HTTP API + watcher + pipeline
//! searchr upload ./q1-report.pdf   # put a file into the bucket
//! searchr search "revenue"
//! searchr sync                     # backfill objects already in the bucket
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connection pool |
//! | [`sqlite_store`] | FTS5 implementation of the index store |
//! | [`migrate`] | Index bootstrap |
//! | [`storage`] | Blob store adapters (S3, in-memory) |
//! | [`watcher`] | Notification subscription with resubscribe |
//! | [`extract`] | Extractor trait and built-in extractors |
//! | [`tika`] | Apache Tika extractor |
//! | [`ingest`] | Indexing pipeline and worker pool |
//! | [`search`] | `search` command |
//! | [`get`] | `get` command |
//! | [`upload`] | `upload` command |
//! | [`server`] | HTTP API |

pub mod config;
pub mod db;
pub mod extract;
pub mod get;
pub mod ingest;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod storage;
pub mod tika;
pub mod upload;
pub mod watcher;
