//! # searchr core
//!
//! Runtime-free logic shared by every searchr frontend: the document model,
//! the index schema, the search query builder, the [`store::IndexStore`]
//! capability trait and the [`index::IndexManager`] that drives it.
//!
//! This crate contains no tokio, sqlx, network or filesystem code. Index
//! engines plug in by implementing [`store::IndexStore`]; an in-memory
//! implementation ships in [`store::memory`].

pub mod error;
pub mod index;
pub mod models;
pub mod query;
pub mod schema;
pub mod store;

pub use error::IndexError;
pub use index::IndexManager;
pub use models::{
    DocumentView, IndexedDocument, NotificationEvent, OperationType, SearchPage, SearchQuery,
    SortOrder,
};
pub use schema::IndexSchema;
