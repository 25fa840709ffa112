//! Vector index for property embeddings.
//!
//! This module provides the persistent dense-vector index the hybrid
//! retriever searches and the sync pipeline feeds:
//!
//! - [`store`] - Slug-keyed vector store with snapshot persistence
//! - [`filter`] - Conjunctive metadata filtering
//!
//! Entries carry the numeric and categorical filter fields verbatim in
//! metadata so searches can short-circuit without calling the Property
//! Backend. Scores are cosine similarities normalized into `[0, 1]`.

pub mod filter;
pub mod store;

pub use self::filter::MetadataFilter;
pub use self::store::{EntryMetadata, IndexEntry, VectorStore, VectorStats};
