//! `hrag index` and `hrag drop`.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;

use hybrid_rag_core::index::{IndexParams, IndexReport, IndexWriter};
use hybrid_rag_core::store::VectorStore;

use crate::chunks::load_chunks;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

/// Load a chunk file and index it into `collection`.
///
/// Without `swap` the collection is recreated in place. With `swap`,
/// `collection` is treated as an alias: a fresh collection is built and the
/// alias re-pointed only after every batch succeeded.
pub async fn run_index(config: &Config, path: &Path, collection: &str, swap: bool) -> Result<()> {
    let chunks = load_chunks(path)?;
    println!("Loaded {} chunks from {}", chunks.len(), path.display());

    let store = Arc::new(SqliteStore::open(config).await?);
    let writer = IndexWriter::new(
        store.clone(),
        create_embedder(&config.embedding)?,
        IndexParams {
            batch_size: config.index.batch_size,
            space_names: config.vector_spaces.names(),
        },
    );

    let report = if swap {
        writer.rebuild_and_swap(collection, &chunks).await
    } else {
        writer.index_fresh(collection, &chunks).await
    };
    store.close().await;

    print_report(collection, &report);
    if !report.success {
        bail!(
            "indexing into '{}' failed: {}",
            collection,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_report(requested: &str, report: &IndexReport) {
    if report.collection != requested {
        println!("Collection: {} (alias {})", report.collection, requested);
    } else {
        println!("Collection: {}", report.collection);
    }
    println!(
        "Batches:    {} / {}",
        report.batches_committed, report.batches_total
    );
    println!("Indexed:    {} points", report.points_indexed);
    if let Some(count) = report.points_count {
        println!("Stored:     {} points", count);
    }
    if report.success {
        println!("Indexing complete.");
    }
}

/// Delete a collection (or the collection behind an alias).
pub async fn run_drop(config: &Config, collection: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let deleted = store.delete_collection(collection).await;
    let alias_removed = match &deleted {
        Ok(_) => store.delete_alias(collection).await,
        Err(_) => Ok(false),
    };
    store.close().await;

    if deleted? {
        println!("Dropped collection '{}'.", collection);
    } else if alias_removed? {
        println!("Removed alias '{}'.", collection);
    } else {
        bail!("collection '{}' not found", collection);
    }
    Ok(())
}
