//! `hrag search`: hybrid retrieval from the command line.
//!
//! Runs the same two-stage pipeline as chat (dense + sparse prefetch,
//! late-interaction re-rank) with the recall-oriented search limits and
//! prints the ranked chunks with their MaxSim scores.

use anyhow::Result;
use std::sync::Arc;

use hybrid_rag_core::models::{Payload, TEXT_FIELD};
use hybrid_rag_core::retrieve::{HybridRetriever, RetrievalParams};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

/// Longest excerpt printed per result, in characters.
const EXCERPT_CHARS: usize = 240;

pub async fn run_search(
    config: &Config,
    query: &str,
    collection: &str,
    limit: Option<usize>,
    prefetch: Option<usize>,
) -> Result<()> {
    let final_limit = limit.unwrap_or(config.retrieval.final_limit);
    let params = RetrievalParams {
        prefetch_limit: prefetch.unwrap_or(config.retrieval.prefetch_limit).max(1),
    };

    let store = Arc::new(SqliteStore::open(config).await?);
    let retriever = HybridRetriever::new(
        store.clone(),
        create_embedder(&config.embedding)?,
        collection,
        params,
    );

    let results = retriever.retrieve_scored(query, final_limit).await;
    store.close().await;
    let results = results?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let chunk_id = result
            .payload
            .get("chunk_id")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        println!("{}. [{:.4}] chunk {}", i + 1, result.score, chunk_id);
        for (key, value) in metadata_fields(&result.payload) {
            println!("    {}: {}", key, value);
        }
        println!("    excerpt: \"{}\"", excerpt(&result.payload));
        println!();
    }

    Ok(())
}

fn metadata_fields(payload: &Payload) -> Vec<(&str, String)> {
    payload
        .iter()
        .filter(|(k, _)| k.as_str() != TEXT_FIELD && k.as_str() != "chunk_id")
        .map(|(k, v)| {
            let shown = match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            };
            (k.as_str(), shown)
        })
        .collect()
}

fn excerpt(payload: &Payload) -> String {
    let text = payload
        .get(TEXT_FIELD)
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= EXCERPT_CHARS {
        flat.to_string()
    } else {
        let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}
