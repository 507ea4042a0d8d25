//! Library-level retrieval tests against both store implementations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use hybrid_rag::config::Config;
use hybrid_rag::sqlite_store::SqliteStore;
use hybrid_rag_core::bm25::Bm25Embedder;
use hybrid_rag_core::embedding::{Embedder, LateInteractionEmbedder};
use hybrid_rag_core::error::RetrievalError;
use hybrid_rag_core::hashing::{HashedDenseEmbedder, HashedTokenEmbedder};
use hybrid_rag_core::index::{IndexParams, IndexWriter};
use hybrid_rag_core::models::{
    Chunk, CollectionSchema, EmbeddedPoint, MultiVector, Payload, SpaceNames, TEXT_FIELD,
};
use hybrid_rag_core::retrieve::{HybridRetriever, RetrievalParams};
use hybrid_rag_core::store::memory::InMemoryStore;
use hybrid_rag_core::store::{
    PayloadRecord, QueryVector, ScoredPoint, ScrollPage, SearchRequest, VectorStore,
};
use hybrid_rag_core::summarize::{collect_document, HeuristicTokenCounter, SummarizeParams};

const MITOCHONDRIA: &str = "The mitochondria is the powerhouse of the cell.";
const ENERGY_QUERY: &str = "What produces energy in a cell?";

/// Words sharing no word and no character trigram with [`ENERGY_QUERY`].
const UNRELATED_WORDS: &[&str] = &[
    "volcanic", "basalt", "forms", "from", "lava", "flows", "glaciers", "carve", "valleys",
    "over", "millennia", "chess", "openings", "reward", "careful", "study", "parrots", "mimic",
    "human", "speech", "patterns", "tulips", "bloom", "during", "spring", "months", "bamboo",
    "grows", "remarkably", "fast", "kayaks", "glide", "along", "quiet", "rivers", "desert",
    "cacti", "store", "water", "snowboarders", "fresh", "powder", "jupiter", "storm", "system",
    "bowing", "sourdough", "bread", "slowly", "overnight", "marathon", "hydrate", "copper",
    "wire", "submarine", "navigate", "sonar", "origami", "folds", "paper", "lighthouse", "guide",
    "ships", "night", "honeybee", "dance", "granite", "countertop", "jazz", "musician", "solo",
    "telescope", "magnify", "distant", "galaxy", "cheddar", "falcon", "dive", "speed", "tornado",
    "severe", "piano", "hammer", "striking", "string", "block", "shower", "harbor", "crane",
    "lift", "shipping", "zebra", "kite", "orbit", "moon", "tide", "ocean", "wave", "sand", "dune",
    "camel", "caravan", "silk", "road", "spice", "trade",
];

fn embedder() -> Embedder {
    Embedder::new(
        Arc::new(HashedDenseEmbedder::new(384)),
        Arc::new(Bm25Embedder::default()),
        Arc::new(HashedTokenEmbedder::new(64)),
    )
}

fn writer(store: Arc<dyn VectorStore>, batch_size: usize) -> IndexWriter {
    IndexWriter::new(
        store,
        embedder(),
        IndexParams {
            batch_size,
            ..IndexParams::default()
        },
    )
}

fn retriever(store: Arc<dyn VectorStore>, collection: &str, prefetch_limit: usize) -> HybridRetriever {
    HybridRetriever::new(store, embedder(), collection, RetrievalParams { prefetch_limit })
}

/// The mitochondria chunk followed by 25 unrelated distractors.
fn corpus() -> Vec<Chunk> {
    let mut chunks = vec![Chunk::new("mito", MITOCHONDRIA)];
    for i in 0..25 {
        let text = UNRELATED_WORDS[i * 4..i * 4 + 5].join(" ");
        chunks.push(Chunk::new(format!("d{i}"), text));
    }
    chunks
}

async fn sqlite_store(tmp: &TempDir) -> Arc<SqliteStore> {
    let mut config = Config::default();
    config.db.path = tmp.path().join("data").join("hrag.sqlite");
    Arc::new(SqliteStore::open(&config).await.unwrap())
}

fn chunk_ids<'a>(payloads: impl IntoIterator<Item = &'a Payload>) -> Vec<String> {
    payloads
        .into_iter()
        .map(|p| {
            p.get("chunk_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

/// Run `check` against a fresh in-memory store and a fresh SQLite store.
macro_rules! for_each_store {
    (|$store:ident| $body:block) => {{
        {
            let $store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new());
            $body
        }
        {
            let tmp = TempDir::new().unwrap();
            let $store: Arc<dyn VectorStore> = sqlite_store(&tmp).await;
            $body
        }
    }};
}

#[tokio::test]
async fn test_recreate_is_idempotent() {
    for_each_store!(|store| {
        let w = writer(store.clone(), 10);
        w.index_fresh("docs", &corpus()).await;

        w.create_collection("docs", true).await.unwrap();
        let first = store.collection_schema("docs").await.unwrap().unwrap();
        assert_eq!(store.count("docs").await.unwrap(), 0);

        w.create_collection("docs", true).await.unwrap();
        let second = store.collection_schema("docs").await.unwrap().unwrap();
        assert_eq!(store.count("docs").await.unwrap(), 0);

        assert_eq!(first, second);
        assert_eq!(first, w.schema());
    });
}

#[tokio::test]
async fn test_incomplete_points_are_rejected_before_upsert() {
    struct NoTokens;

    #[async_trait]
    impl LateInteractionEmbedder for NoTokens {
        fn model_name(&self) -> &str {
            "no-tokens"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed_passages(&self, texts: &[String]) -> Result<Vec<MultiVector>> {
            Ok(texts.iter().map(|_| MultiVector::new(Vec::new())).collect())
        }
        async fn embed_query(&self, _text: &str) -> Result<MultiVector> {
            Ok(MultiVector::new(Vec::new()))
        }
    }

    for_each_store!(|store| {
        let w = IndexWriter::new(
            store.clone(),
            Embedder::new(
                Arc::new(HashedDenseEmbedder::new(16)),
                Arc::new(Bm25Embedder::default()),
                Arc::new(NoTokens),
            ),
            IndexParams::default(),
        );
        let report = w.index_fresh("docs", &corpus()).await;
        assert!(!report.success);
        assert!(report.error.unwrap().contains("late_interaction"));
        assert_eq!(store.count("docs").await.unwrap(), 0);
    });
}

#[tokio::test]
async fn test_indexed_points_carry_all_three_spaces() {
    for_each_store!(|store| {
        let w = writer(store.clone(), 4);
        assert!(w.index_fresh("docs", &corpus()).await.success);

        let schema = store.collection_schema("docs").await.unwrap().unwrap();
        let names = schema.spaces.names();
        let query = embedder().embed_query("glaciers carve valleys").await.unwrap();

        // Dense and late-interaction scans reach every point
        for (using, vector) in [
            (names.dense, QueryVector::Dense(query.dense.clone())),
            (names.late_interaction.clone(), QueryVector::Multi(query.late_interaction.clone())),
        ] {
            let hits = store
                .search(
                    "docs",
                    &SearchRequest {
                        query: vector,
                        using: using.clone(),
                        prefetch: Vec::new(),
                        limit: 100,
                    },
                )
                .await
                .unwrap();
            assert_eq!(hits.len(), 26, "space {using}");
        }

        // The sparse scan only reaches points sharing a term
        let hits = store
            .search(
                "docs",
                &SearchRequest {
                    query: QueryVector::Sparse(query.sparse.clone()),
                    using: names.sparse,
                    prefetch: Vec::new(),
                    limit: 100,
                },
            )
            .await
            .unwrap();
        assert_eq!(chunk_ids(hits.iter().map(|p| &p.payload)), vec!["d1", "d2"]);
    });
}

#[tokio::test]
async fn test_union_holds_only_dense_and_term_matches() {
    for_each_store!(|store| {
        let w = writer(store.clone(), 10);
        assert!(w.index_fresh("docs", &corpus()).await.success);

        let schema = store.collection_schema("docs").await.unwrap().unwrap();
        let query = embedder().embed_query(ENERGY_QUERY).await.unwrap();
        let dense_top = store
            .search(
                "docs",
                &SearchRequest {
                    query: QueryVector::Dense(query.dense),
                    using: schema.spaces.dense.name.clone(),
                    prefetch: Vec::new(),
                    limit: 2,
                },
            )
            .await
            .unwrap();
        let mut allowed = chunk_ids(dense_top.iter().map(|p| &p.payload));
        // Only the mitochondria chunk shares a term ("cell") with the query
        allowed.push("mito".to_string());

        let results = retriever(store.clone(), "docs", 2)
            .retrieve_scored(ENERGY_QUERY, 1000)
            .await
            .unwrap();
        let found = chunk_ids(results.iter().map(|r| &r.payload));
        assert!(found.len() <= 3, "pool: {found:?}");
        assert!(found.iter().any(|id| id == "mito"));
        for id in &found {
            assert!(allowed.contains(id), "{id} found by neither prefetch");
        }
    });
}

#[tokio::test]
async fn test_candidate_pool_grows_with_prefetch_limit() {
    for_each_store!(|store| {
        let w = writer(store.clone(), 10);
        assert!(w.index_fresh("docs", &corpus()).await.success);

        let mut previous = 0;
        for prefetch in 1..=26 {
            let pool = retriever(store.clone(), "docs", prefetch)
                .retrieve_scored(ENERGY_QUERY, 1000)
                .await
                .unwrap()
                .len();
            assert!(pool >= previous, "prefetch {prefetch}: {pool} < {previous}");
            assert!(pool <= 2 * prefetch);
            previous = pool;
        }
        assert_eq!(previous, 26);
    });
}

#[tokio::test]
async fn test_results_bounded_and_sorted() {
    for_each_store!(|store| {
        let w = writer(store.clone(), 10);
        assert!(w.index_fresh("docs", &corpus()).await.success);
        let r = retriever(store.clone(), "docs", 20);

        for k in [0, 1, 3, 10, 50] {
            let results = r.retrieve_scored(ENERGY_QUERY, k).await.unwrap();
            assert!(results.len() <= k);
            assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        }
        let payloads = r.retrieve(ENERGY_QUERY, 3).await.unwrap();
        assert_eq!(payloads.len(), 3);
        assert!(payloads.iter().all(|p| p.contains_key(TEXT_FIELD)));
    });
}

#[tokio::test]
async fn test_empty_collection_returns_nothing() {
    for_each_store!(|store| {
        let w = writer(store.clone(), 10);
        w.create_collection("empty", true).await.unwrap();
        let results = retriever(store.clone(), "empty", 20)
            .retrieve(ENERGY_QUERY, 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    });
}

#[tokio::test]
async fn test_missing_collection_is_typed_error() {
    for_each_store!(|store| {
        let err = retriever(store.clone(), "ghost", 20)
            .retrieve(ENERGY_QUERY, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::CollectionNotFound { .. }));
    });
}

#[tokio::test]
async fn test_paraphrase_lands_in_dense_prefetch() {
    for_each_store!(|store| {
        let w = writer(store.clone(), 10);
        assert!(w.index_fresh("docs", &corpus()).await.success);

        let schema = store.collection_schema("docs").await.unwrap().unwrap();
        let query = embedder().embed_query(ENERGY_QUERY).await.unwrap();
        let top20 = store
            .search(
                "docs",
                &SearchRequest {
                    query: QueryVector::Dense(query.dense),
                    using: schema.spaces.dense.name.clone(),
                    prefetch: Vec::new(),
                    limit: 20,
                },
            )
            .await
            .unwrap();
        assert_eq!(top20.len(), 20);
        assert!(top20
            .iter()
            .any(|p| p.payload.get(TEXT_FIELD).and_then(|v| v.as_str()) == Some(MITOCHONDRIA)));

        let results = retriever(store.clone(), "docs", 20)
            .retrieve(ENERGY_QUERY, 26)
            .await
            .unwrap();
        assert!(results
            .iter()
            .any(|p| p.get("chunk_id").and_then(|v| v.as_str()) == Some("mito")));
    });
}

#[tokio::test]
async fn test_model_change_is_refused() {
    for_each_store!(|store| {
        let w = writer(store.clone(), 10);
        assert!(w.index_fresh("docs", &corpus()).await.success);

        let other = Embedder::new(
            Arc::new(HashedDenseEmbedder::new(128)),
            Arc::new(Bm25Embedder::default()),
            Arc::new(HashedTokenEmbedder::new(64)),
        );
        let err = HybridRetriever::new(store.clone(), other, "docs", RetrievalParams::SEARCH)
            .retrieve(ENERGY_QUERY, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::ModelMismatch { .. }));
    });
}

/// Delegates to an in-memory store but fails the `fail_on`-th upsert.
struct FlakyStore {
    inner: InMemoryStore,
    upserts: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        self.inner.collection_exists(name).await
    }
    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> Result<()> {
        self.inner.create_collection(name, schema).await
    }
    async fn delete_collection(&self, name: &str) -> Result<bool> {
        self.inner.delete_collection(name).await
    }
    async fn collection_schema(&self, name: &str) -> Result<Option<CollectionSchema>> {
        self.inner.collection_schema(name).await
    }
    async fn upsert(&self, collection: &str, points: &[EmbeddedPoint]) -> Result<()> {
        let n = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            bail!("connection reset during upsert {n}");
        }
        self.inner.upsert(collection, points).await
    }
    async fn search(&self, collection: &str, request: &SearchRequest) -> Result<Vec<ScoredPoint>> {
        self.inner.search(collection, request).await
    }
    async fn scroll(
        &self,
        collection: &str,
        offset: Option<u64>,
        page_size: usize,
    ) -> Result<ScrollPage> {
        self.inner.scroll(collection, offset, page_size).await
    }
    async fn count(&self, collection: &str) -> Result<u64> {
        self.inner.count(collection).await
    }
    async fn set_alias(&self, alias: &str, collection: &str) -> Result<Option<String>> {
        self.inner.set_alias(alias, collection).await
    }
    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>> {
        self.inner.resolve_alias(alias).await
    }
    async fn delete_alias(&self, alias: &str) -> Result<bool> {
        self.inner.delete_alias(alias).await
    }
    async fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.list_collections().await
    }
}

#[tokio::test]
async fn test_failed_batch_keeps_earlier_batches() {
    let store = Arc::new(FlakyStore {
        inner: InMemoryStore::new(),
        upserts: AtomicUsize::new(0),
        fail_on: 3,
    });
    let chunks: Vec<Chunk> = corpus().into_iter().take(10).collect();

    let report = writer(store.clone(), 2).index_fresh("docs", &chunks).await;
    assert!(!report.success);
    assert_eq!(report.batches_total, 5);
    assert_eq!(report.batches_committed, 2);
    assert_eq!(report.points_indexed, 4);
    assert_eq!(report.points_count, Some(4));
    assert!(report.error.unwrap().contains("batch 3"));
    assert_eq!(store.count("docs").await.unwrap(), 4);
}

#[tokio::test]
async fn test_failed_swap_leaves_alias_on_previous_build() {
    let store = Arc::new(FlakyStore {
        inner: InMemoryStore::new(),
        upserts: AtomicUsize::new(0),
        fail_on: 4,
    });
    let chunks: Vec<Chunk> = corpus().into_iter().take(6).collect();
    let w = writer(store.clone(), 2);

    // Upserts 1..=3 succeed
    let first = w.rebuild_and_swap("live", &chunks).await;
    assert!(first.success);
    let live = store.resolve_alias("live").await.unwrap().unwrap();
    assert_eq!(live, first.collection);

    // Upsert 4 fails mid-build
    let second = w.rebuild_and_swap("live", &chunks).await;
    assert!(!second.success);
    assert_eq!(store.resolve_alias("live").await.unwrap().as_deref(), Some(live.as_str()));
    assert!(!store.collection_exists(&second.collection).await.unwrap());
    assert_eq!(store.count("live").await.unwrap(), 6);
    assert_eq!(store.list_collections().await.unwrap(), vec![live]);
}

#[tokio::test]
async fn test_summary_stops_at_first_chunk_over_budget() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;

    // 4, 4, 20, 1 tokens under the 4-chars-per-token heuristic
    let chunks = vec![
        Chunk::new("a", "a".repeat(16)),
        Chunk::new("b", "b".repeat(16)),
        Chunk::new("c", "c".repeat(80)),
        Chunk::new("d", "dd"),
    ];
    assert!(writer(store.clone(), 2).index_fresh("doc", &chunks).await.success);

    let params = SummarizeParams {
        max_tokens: 10,
        page_size: 1,
    };
    let excerpt = collect_document(store.as_ref(), "doc", &HeuristicTokenCounter, params)
        .await
        .unwrap();

    assert_eq!(excerpt.chunks_included, 2);
    assert_eq!(excerpt.tokens, 8);
    assert!(excerpt.truncated);
    assert_eq!(
        excerpt.text,
        format!("{}\n\n{}\n\n", "a".repeat(16), "b".repeat(16))
    );
    assert!(!excerpt.text.contains('d'));

    let all = collect_document(
        store.as_ref(),
        "doc",
        &HeuristicTokenCounter,
        SummarizeParams::default(),
    )
    .await
    .unwrap();
    assert_eq!(all.chunks_included, 4);
    assert!(!all.truncated);
}

#[tokio::test]
async fn test_sqlite_scroll_pages_in_storage_order() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let chunks = corpus();
    assert!(writer(store.clone(), 7).index_fresh("docs", &chunks).await.success);

    let mut seen: Vec<PayloadRecord> = Vec::new();
    let mut offset = None;
    loop {
        let page = store.scroll("docs", offset, 5).await.unwrap();
        seen.extend(page.points);
        match page.next_offset {
            Some(next) => offset = Some(next),
            None => break,
        }
    }
    let ids: Vec<&str> = seen
        .iter()
        .map(|r| r.payload["chunk_id"].as_str().unwrap())
        .collect();
    let expected: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, expected);

    // Names other than the defaults round-trip through the stored schema
    let names = SpaceNames {
        dense: "d".into(),
        sparse: "s".into(),
        late_interaction: "l".into(),
    };
    let w = IndexWriter::new(
        store.clone(),
        embedder(),
        IndexParams {
            batch_size: 10,
            space_names: names.clone(),
        },
    );
    w.create_collection("custom", true).await.unwrap();
    let schema = store.collection_schema("custom").await.unwrap().unwrap();
    assert_eq!(schema.spaces.names(), names);
}
