//! Hybrid retriever: dense and sparse prefetch, late-interaction re-rank.
//!
//! Each call:
//! 1. looks up the collection schema (missing collection fails before any
//!    embedding work),
//! 2. checks the pinned model identity against the embedder,
//! 3. embeds the query with all three models,
//! 4. issues one search with two prefetches (dense then sparse, each capped
//!    at `prefetch_limit`) re-scored by MaxSim over the late-interaction
//!    space and truncated to `final_limit`.
//!
//! Zero candidates is an empty `Ok`, never an error.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::RetrievalError;
use crate::models::{CollectionSchema, Payload, PointVectors};
use crate::store::{Prefetch, QueryVector, SearchRequest, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalParams {
    /// Candidates kept by each prefetch.
    pub prefetch_limit: usize,
}

impl RetrievalParams {
    /// Interactive search: recall-oriented.
    pub const SEARCH: Self = Self { prefetch_limit: 20 };
    /// Chat serving: latency-oriented.
    pub const CHAT: Self = Self { prefetch_limit: 10 };
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self::SEARCH
    }
}

/// A re-ranked payload with its late-interaction score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPayload {
    pub score: f32,
    pub payload: Payload,
}

/// Stateless per call; holds only the collection handle, embedder and limits.
#[derive(Clone)]
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Embedder,
    collection: String,
    params: RetrievalParams,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Embedder,
        collection: impl Into<String>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            store,
            embedder,
            collection: collection.into(),
            params,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn params(&self) -> RetrievalParams {
        self.params
    }

    /// Ordered payloads (text and metadata) for `query`, at most `final_limit`.
    pub async fn retrieve(
        &self,
        query: &str,
        final_limit: usize,
    ) -> Result<Vec<Payload>, RetrievalError> {
        Ok(self
            .retrieve_scored(query, final_limit)
            .await?
            .into_iter()
            .map(|r| r.payload)
            .collect())
    }

    /// Like [`retrieve`](Self::retrieve), keeping the re-rank scores.
    pub async fn retrieve_scored(
        &self,
        query: &str,
        final_limit: usize,
    ) -> Result<Vec<RankedPayload>, RetrievalError> {
        let schema = self.schema().await?;

        if query.trim().is_empty() || final_limit == 0 {
            return Ok(Vec::new());
        }

        let vectors = self.embedder.embed_query(query).await?;
        let request = self.build_request(&schema, vectors, final_limit);

        let hits = self
            .store
            .search(&self.collection, &request)
            .await
            .map_err(|e| RetrievalError::storage(&self.collection, &e))?;

        tracing::debug!(
            collection = %self.collection,
            prefetch_limit = self.params.prefetch_limit,
            final_limit,
            results = hits.len(),
            "hybrid retrieval"
        );

        Ok(hits
            .into_iter()
            .map(|h| RankedPayload {
                score: h.score,
                payload: h.payload,
            })
            .collect())
    }

    async fn schema(&self) -> Result<CollectionSchema, RetrievalError> {
        let schema = self
            .store
            .collection_schema(&self.collection)
            .await
            .map_err(|e| RetrievalError::storage(&self.collection, &e))?
            .ok_or_else(|| RetrievalError::CollectionNotFound {
                collection: self.collection.clone(),
            })?;

        let found = self.embedder.identity();
        if let Some(expected) = &schema.models {
            if *expected != found {
                return Err(RetrievalError::ModelMismatch {
                    collection: self.collection.clone(),
                    expected: expected.clone(),
                    found,
                });
            }
        }
        Ok(schema)
    }

    fn build_request(
        &self,
        schema: &CollectionSchema,
        vectors: PointVectors,
        final_limit: usize,
    ) -> SearchRequest {
        let spaces = &schema.spaces;
        SearchRequest {
            query: QueryVector::Multi(vectors.late_interaction),
            using: spaces.late_interaction.name.clone(),
            prefetch: vec![
                Prefetch {
                    query: QueryVector::Dense(vectors.dense),
                    using: spaces.dense.name.clone(),
                    limit: self.params.prefetch_limit,
                },
                Prefetch {
                    query: QueryVector::Sparse(vectors.sparse),
                    using: spaces.sparse.name.clone(),
                    limit: self.params.prefetch_limit,
                },
            ],
            limit: final_limit,
        }
    }
}
