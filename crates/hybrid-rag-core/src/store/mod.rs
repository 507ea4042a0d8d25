//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers everything indexing, retrieval and
//! summarization need from a backend: named collections with a fixed
//! [`CollectionSchema`], batch upserts of [`EmbeddedPoint`]s, two-stage
//! search via [`SearchRequest`], paged scroll and aliases.
//!
//! Every collection-name argument is resolved through the alias table first,
//! so callers can address a collection by alias or by its real name.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{CollectionSchema, EmbeddedPoint, MultiVector, Payload, SparseVector};

/// A query vector for one named space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "vector", rename_all = "snake_case")]
pub enum QueryVector {
    Dense(Vec<f32>),
    Sparse(SparseVector),
    Multi(MultiVector),
}

/// A first-stage candidate search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prefetch {
    pub query: QueryVector,
    /// Name of the vector space to search.
    pub using: String,
    pub limit: usize,
}

/// A search over a collection.
///
/// With a non-empty `prefetch`, only the de-duplicated union of prefetch
/// results is scored by `query`; the union keeps first-seen order across
/// prefetches and ties in the final ordering keep that order. With no
/// prefetch, every point is a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: QueryVector,
    pub using: String,
    #[serde(default)]
    pub prefetch: Vec<Prefetch>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadRecord {
    pub id: String,
    pub payload: Payload,
}

/// One page of a scroll, in storage order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollPage {
    pub points: Vec<PayloadRecord>,
    /// Offset of the next page, `None` when the collection is exhausted.
    pub next_offset: Option<u64>,
}

/// Abstract storage backend for hybrid collections.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_collection`](VectorStore::create_collection) | Declare a new collection and its schema |
/// | [`delete_collection`](VectorStore::delete_collection) | Drop a collection and aliases pointing at it |
/// | [`upsert`](VectorStore::upsert) | Write one batch of points atomically |
/// | [`search`](VectorStore::search) | Prefetch then re-score |
/// | [`scroll`](VectorStore::scroll) | Page through payloads in storage order |
/// | [`set_alias`](VectorStore::set_alias) | Point an alias at a collection |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Create a collection. Fails if `name` is already a collection or alias.
    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> Result<()>;

    /// Delete a collection (resolving aliases) and every alias that targets it.
    ///
    /// Returns `false` when there was nothing to delete.
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    async fn collection_schema(&self, name: &str) -> Result<Option<CollectionSchema>>;

    /// Insert or replace a batch of points. Either the whole batch is
    /// written or none of it is.
    async fn upsert(&self, collection: &str, points: &[EmbeddedPoint]) -> Result<()>;

    async fn search(&self, collection: &str, request: &SearchRequest) -> Result<Vec<ScoredPoint>>;

    /// Read up to `page_size` payloads starting at `offset` (`None` = start).
    async fn scroll(
        &self,
        collection: &str,
        offset: Option<u64>,
        page_size: usize,
    ) -> Result<ScrollPage>;

    async fn count(&self, collection: &str) -> Result<u64>;

    /// Point `alias` at `collection`, returning the previous target.
    async fn set_alias(&self, alias: &str, collection: &str) -> Result<Option<String>>;

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>>;

    async fn delete_alias(&self, alias: &str) -> Result<bool>;

    /// Real collection names, sorted.
    async fn list_collections(&self) -> Result<Vec<String>>;
}
