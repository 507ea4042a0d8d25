//! Index writer: collection creation, batched embedding and upsert.
//!
//! Indexing is strictly sequential: each batch of `batch_size` chunks is
//! embedded (one call per sub-embedder) and upserted before the next batch
//! starts. A failed batch stops the run; batches already committed stay in
//! the collection. Callers should treat an unsuccessful [`IndexReport`] as
//! "collection may be partially populated" and re-run with a recreate or use
//! [`IndexWriter::rebuild_and_swap`], which never exposes a partial build.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::models::{Chunk, CollectionSchema, EmbeddedPoint, SpaceNames, VectorSpaces};
use crate::store::VectorStore;

#[derive(Debug, Clone)]
pub struct IndexParams {
    /// Points per upsert batch.
    pub batch_size: usize,
    pub space_names: SpaceNames,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            batch_size: 10,
            space_names: SpaceNames::default(),
        }
    }
}

/// Outcome of an indexing run. Indexing never returns an error; failures
/// are reported here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexReport {
    pub success: bool,
    /// Real collection the points were written to.
    pub collection: String,
    pub points_indexed: usize,
    pub batches_committed: usize,
    pub batches_total: usize,
    /// Point count read back after the run, if the store answered.
    pub points_count: Option<u64>,
    pub error: Option<String>,
}

impl IndexReport {
    fn new(collection: &str, chunks: usize, batch_size: usize) -> Self {
        Self {
            success: false,
            collection: collection.to_string(),
            points_indexed: 0,
            batches_committed: 0,
            batches_total: chunks.div_ceil(batch_size.max(1)),
            points_count: None,
            error: None,
        }
    }

    fn failed(collection: &str, err: &anyhow::Error) -> Self {
        let mut report = Self::new(collection, 0, 1);
        report.error = Some(format!("{err:#}"));
        report
    }
}

pub struct IndexWriter {
    store: Arc<dyn VectorStore>,
    embedder: Embedder,
    params: IndexParams,
}

impl IndexWriter {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Embedder, params: IndexParams) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    /// The schema this writer declares: three named spaces sized by the
    /// embedder, with the embedder's model identity pinned.
    pub fn schema(&self) -> CollectionSchema {
        CollectionSchema {
            spaces: VectorSpaces::new(
                &self.params.space_names,
                self.embedder.dense_dims(),
                self.embedder.late_interaction_dims(),
            ),
            models: Some(self.embedder.identity()),
        }
    }

    /// Create `name`. With `recreate`, an existing collection is dropped
    /// first (its points are lost). Without it, an existing collection is
    /// kept if its schema matches and rejected otherwise.
    pub async fn create_collection(&self, name: &str, recreate: bool) -> Result<()> {
        let schema = self.schema();
        if self.store.collection_exists(name).await? {
            if recreate {
                tracing::info!(collection = name, "dropping existing collection");
                self.store.delete_collection(name).await?;
            } else {
                let existing = self.store.collection_schema(name).await?;
                if existing.as_ref() != Some(&schema) {
                    bail!("collection '{name}' exists with a different schema");
                }
                return Ok(());
            }
        }
        self.store
            .create_collection(name, &schema)
            .await
            .with_context(|| format!("failed to create collection '{name}'"))?;
        tracing::info!(collection = name, "created collection");
        Ok(())
    }

    /// Embed and upsert `chunks` into an existing collection.
    pub async fn index(&self, collection: &str, chunks: &[Chunk]) -> IndexReport {
        let batch_size = self.params.batch_size.max(1);
        let mut report = IndexReport::new(collection, chunks.len(), batch_size);

        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            match self.index_batch(collection, batch).await {
                Ok(n) => {
                    report.points_indexed += n;
                    report.batches_committed += 1;
                    tracing::debug!(
                        collection,
                        batch = batch_no + 1,
                        of = report.batches_total,
                        points = n,
                        "batch committed"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        collection,
                        batch = batch_no + 1,
                        of = report.batches_total,
                        error = %format!("{e:#}"),
                        "indexing batch failed"
                    );
                    report.error = Some(format!("batch {}: {e:#}", batch_no + 1));
                    break;
                }
            }
        }

        report.success = report.error.is_none();
        report.points_count = match self.store.count(collection).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(collection, error = %e, "could not read point count");
                None
            }
        };

        if report.success {
            tracing::info!(
                collection,
                points = report.points_indexed,
                batches = report.batches_committed,
                "indexing complete"
            );
        }
        report
    }

    async fn index_batch(&self, collection: &str, batch: &[Chunk]) -> Result<usize> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_passages(&texts).await?;

        let schema = self.schema();
        let points: Vec<EmbeddedPoint> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, v)| EmbeddedPoint::from_chunk(chunk, v))
            .collect();
        for (chunk, point) in batch.iter().zip(&points) {
            point
                .validate(&schema.spaces)
                .with_context(|| format!("chunk '{}' produced an invalid point", chunk.id))?;
        }

        self.store.upsert(collection, &points).await?;
        Ok(points.len())
    }

    /// Recreate `collection` and index `chunks` into it.
    pub async fn index_fresh(&self, collection: &str, chunks: &[Chunk]) -> IndexReport {
        if let Err(e) = self.create_collection(collection, true).await {
            tracing::error!(collection, error = %format!("{e:#}"), "could not recreate collection");
            return IndexReport::failed(collection, &e);
        }
        self.index(collection, chunks).await
    }

    /// Build a new versioned collection, then re-point `alias` at it.
    ///
    /// Queries through `alias` see either the old build or the complete new
    /// one. On failure the partial build is dropped and `alias` is untouched.
    /// A real collection that already holds the alias name (from plain
    /// indexing) is replaced once the new build is ready.
    pub async fn rebuild_and_swap(&self, alias: &str, chunks: &[Chunk]) -> IndexReport {
        let suffix = Uuid::new_v4().simple().to_string();
        let target = format!("{alias}-{}", &suffix[..8]);

        if let Err(e) = self.create_collection(&target, true).await {
            tracing::error!(collection = %target, error = %format!("{e:#}"), "could not create build collection");
            return IndexReport::failed(&target, &e);
        }

        let mut report = self.index(&target, chunks).await;
        if !report.success {
            if let Err(e) = self.store.delete_collection(&target).await {
                tracing::warn!(collection = %target, error = %e, "could not drop failed build");
            }
            return report;
        }

        if let Err(e) = self.swap_alias(alias, &target).await {
            tracing::error!(alias, collection = %target, error = %format!("{e:#}"), "alias swap failed");
            report.success = false;
            report.error = Some(format!("alias swap: {e:#}"));
        }
        report
    }

    async fn swap_alias(&self, alias: &str, target: &str) -> Result<()> {
        let is_real_collection = self.store.resolve_alias(alias).await?.is_none()
            && self.store.collection_exists(alias).await?;
        if is_real_collection {
            tracing::warn!(alias, "replacing plain collection with an alias");
            self.store.delete_collection(alias).await?;
        }

        let previous = self.store.set_alias(alias, target).await?;
        tracing::info!(alias, collection = target, previous = ?previous, "alias swapped");

        if let Some(old) = previous.filter(|old| old != target) {
            self.store
                .delete_collection(&old)
                .await
                .with_context(|| format!("failed to delete previous build '{old}'"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bm25::Bm25Embedder;
    use crate::hashing::{HashedDenseEmbedder, HashedTokenEmbedder};
    use crate::store::memory::InMemoryStore;

    fn writer(store: Arc<InMemoryStore>, batch_size: usize) -> IndexWriter {
        let embedder = Embedder::new(
            Arc::new(HashedDenseEmbedder::new(32)),
            Arc::new(Bm25Embedder::default()),
            Arc::new(HashedTokenEmbedder::new(16)),
        );
        IndexWriter::new(
            store,
            embedder,
            IndexParams {
                batch_size,
                ..IndexParams::default()
            },
        )
    }

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk::new(i.to_string(), format!("chunk number {i} about topic {i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_index_reports_counts() {
        let store = Arc::new(InMemoryStore::new());
        let w = writer(store.clone(), 3);
        let report = w.index_fresh("docs", &chunks(7)).await;
        assert!(report.success, "{:?}", report.error);
        assert_eq!(report.points_indexed, 7);
        assert_eq!(report.batches_total, 3);
        assert_eq!(report.batches_committed, 3);
        assert_eq!(report.points_count, Some(7));
    }

    #[tokio::test]
    async fn test_index_missing_collection_fails_without_panicking() {
        let store = Arc::new(InMemoryStore::new());
        let report = writer(store, 10).index("missing", &chunks(2)).await;
        assert!(!report.success);
        assert!(report.error.is_some());
        assert_eq!(report.points_count, None);
    }

    #[tokio::test]
    async fn test_create_without_recreate_keeps_matching_schema() {
        let store = Arc::new(InMemoryStore::new());
        let w = writer(store.clone(), 10);
        w.index_fresh("docs", &chunks(2)).await;
        w.create_collection("docs", false).await.unwrap();
        assert_eq!(store.count("docs").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_create_without_recreate_rejects_other_schema() {
        let store = Arc::new(InMemoryStore::new());
        writer(store.clone(), 10)
            .create_collection("docs", false)
            .await
            .unwrap();
        let other = IndexWriter::new(
            store,
            Embedder::new(
                Arc::new(HashedDenseEmbedder::new(64)),
                Arc::new(Bm25Embedder::default()),
                Arc::new(HashedTokenEmbedder::new(16)),
            ),
            IndexParams::default(),
        );
        assert!(other.create_collection("docs", false).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_input_is_success() {
        let store = Arc::new(InMemoryStore::new());
        let report = writer(store, 10).index_fresh("docs", &[]).await;
        assert!(report.success);
        assert_eq!(report.batches_total, 0);
        assert_eq!(report.points_count, Some(0));
    }

    #[tokio::test]
    async fn test_rebuild_and_swap_replaces_previous_build() {
        let store = Arc::new(InMemoryStore::new());
        let w = writer(store.clone(), 4);

        let first = w.rebuild_and_swap("docs", &chunks(3)).await;
        assert!(first.success);
        assert!(first.collection.starts_with("docs-"));
        assert_eq!(first.collection.len(), "docs-".len() + 8);
        assert_eq!(store.count("docs").await.unwrap(), 3);

        let second = w.rebuild_and_swap("docs", &chunks(5)).await;
        assert!(second.success);
        assert_eq!(
            store.resolve_alias("docs").await.unwrap(),
            Some(second.collection.clone())
        );
        assert_eq!(store.count("docs").await.unwrap(), 5);
        assert!(!store.collection_exists(&first.collection).await.unwrap());
    }

    #[tokio::test]
    async fn test_rebuild_and_swap_converts_plain_collection() {
        let store = Arc::new(InMemoryStore::new());
        let w = writer(store.clone(), 4);
        w.index_fresh("docs", &chunks(2)).await;

        let report = w.rebuild_and_swap("docs", &chunks(6)).await;
        assert!(report.success, "{:?}", report.error);
        assert_eq!(store.count("docs").await.unwrap(), 6);
        assert_eq!(store.list_collections().await.unwrap(), vec![report.collection]);
    }
}
