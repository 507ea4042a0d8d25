//! Whole-document collection for summarization.
//!
//! Bypasses ranking: scrolls the collection in storage order and
//! concatenates chunk text until the token budget is reached. Truncation is
//! lossy by contract: the first chunk that does not fit entirely ends the
//! scan and everything after it is dropped, even if a later chunk is small
//! enough. No chunk is ever cut in the middle.

use serde::Serialize;

use crate::error::RetrievalError;
use crate::models::TEXT_FIELD;
use crate::store::VectorStore;

/// Counts tokens the way the downstream model's tokenizer would.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Approximate tokenizer: roughly 4 characters per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

/// Rough characters-per-token ratio for English text.
pub const CHARS_PER_TOKEN: usize = 4;

impl TokenCounter for HeuristicTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarizeParams {
    pub max_tokens: usize,
    /// Points fetched per scroll page.
    pub page_size: usize,
}

impl Default for SummarizeParams {
    fn default() -> Self {
        Self {
            max_tokens: 120_000,
            page_size: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentExcerpt {
    /// Included chunk texts, each followed by a blank line.
    pub text: String,
    pub chunks_included: usize,
    pub tokens: usize,
    /// `true` when at least one chunk was dropped for budget.
    pub truncated: bool,
}

/// Collect the collection's text in storage order up to `params.max_tokens`.
pub async fn collect_document(
    store: &dyn VectorStore,
    collection: &str,
    counter: &dyn TokenCounter,
    params: SummarizeParams,
) -> Result<DocumentExcerpt, RetrievalError> {
    let storage_err = |e: anyhow::Error| RetrievalError::storage(collection, &e);

    if !store.collection_exists(collection).await.map_err(storage_err)? {
        return Err(RetrievalError::CollectionNotFound {
            collection: collection.to_string(),
        });
    }

    let mut excerpt = DocumentExcerpt {
        text: String::new(),
        chunks_included: 0,
        tokens: 0,
        truncated: false,
    };
    let page_size = params.page_size.max(1);
    let mut offset = None;

    'pages: loop {
        let page = store
            .scroll(collection, offset, page_size)
            .await
            .map_err(storage_err)?;

        for record in &page.points {
            let Some(text) = record.payload.get(TEXT_FIELD).and_then(|v| v.as_str()) else {
                continue;
            };
            let tokens = counter.count_tokens(text);
            if excerpt.tokens + tokens > params.max_tokens {
                excerpt.truncated = true;
                break 'pages;
            }
            excerpt.text.push_str(text);
            excerpt.text.push_str("\n\n");
            excerpt.tokens += tokens;
            excerpt.chunks_included += 1;
        }

        match page.next_offset {
            Some(next) => offset = Some(next),
            None => break,
        }
    }

    tracing::debug!(
        collection,
        chunks = excerpt.chunks_included,
        tokens = excerpt.tokens,
        truncated = excerpt.truncated,
        "collected document for summary"
    );
    Ok(excerpt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Chunk, CollectionSchema, EmbeddedPoint, MultiVector, PointVectors, SpaceNames,
        SparseVector, VectorSpaces,
    };
    use crate::store::memory::InMemoryStore;

    /// One token per whitespace-separated word.
    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count_tokens(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    async fn store_with(texts: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::new();
        let schema = CollectionSchema {
            spaces: VectorSpaces::new(&SpaceNames::default(), 1, 1),
            models: None,
        };
        store.create_collection("doc", &schema).await.unwrap();
        let points: Vec<EmbeddedPoint> = texts
            .iter()
            .map(|t| {
                EmbeddedPoint::from_chunk(
                    &Chunk::new("c", *t),
                    PointVectors {
                        dense: vec![1.0],
                        sparse: SparseVector::new(vec![1], vec![1.0]),
                        late_interaction: MultiVector::new(vec![vec![1.0]]),
                    },
                )
            })
            .collect();
        store.upsert("doc", &points).await.unwrap();
        store
    }

    #[test]
    fn test_heuristic_counter() {
        assert_eq!(HeuristicTokenCounter.count_tokens(""), 0);
        assert_eq!(HeuristicTokenCounter.count_tokens("abcd"), 1);
        assert_eq!(HeuristicTokenCounter.count_tokens("abcde"), 2);
    }

    #[tokio::test]
    async fn test_everything_fits() {
        let store = store_with(&["one two", "three"]).await;
        let out = collect_document(&store, "doc", &WordCounter, SummarizeParams::default())
            .await
            .unwrap();
        assert_eq!(out.text, "one two\n\nthree\n\n");
        assert_eq!(out.chunks_included, 2);
        assert_eq!(out.tokens, 3);
        assert!(!out.truncated);
    }

    #[tokio::test]
    async fn test_stops_at_first_chunk_that_does_not_fit() {
        // 3 + 3 fits in 7; the 4-word chunk does not; the later 1-word chunk
        // would fit but is still dropped.
        let store = store_with(&["a b c", "d e f", "g h i j", "k"]).await;
        let params = SummarizeParams {
            max_tokens: 7,
            page_size: 1,
        };
        let out = collect_document(&store, "doc", &WordCounter, params)
            .await
            .unwrap();
        assert_eq!(out.text, "a b c\n\nd e f\n\n");
        assert_eq!(out.chunks_included, 2);
        assert_eq!(out.tokens, 6);
        assert!(out.truncated);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let store = InMemoryStore::new();
        let err = collect_document(&store, "doc", &WordCounter, SummarizeParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::CollectionNotFound { .. }));
    }
}
