//! Database statistics: collections, point counts and aliases.

use anyhow::{bail, Result};

use hybrid_rag_core::store::VectorStore;

use crate::config::Config;
use crate::sqlite_store::{CollectionInfo, SqliteStore};

/// Run the stats command. With `collection`, only that collection (or the
/// collection behind that alias) is listed.
pub async fn run_stats(config: &Config, collection: Option<&str>) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let infos = store.collection_info().await;
    let resolved = match collection {
        Some(name) => Some(
            store
                .resolve_alias(name)
                .await?
                .unwrap_or_else(|| name.to_string()),
        ),
        None => None,
    };
    store.close().await;

    let mut infos = infos?;
    if let Some(name) = &resolved {
        infos.retain(|i| &i.name == name);
        if infos.is_empty() {
            bail!("collection '{}' not found", name);
        }
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let total_points: i64 = infos.iter().map(|i| i.points).sum();

    println!("Hybrid RAG Database Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Collections: {}", infos.len());
    println!("  Points:      {}", total_points);

    if !infos.is_empty() {
        println!();
        println!(
            "  {:<32} {:>8}   {:<16}   {}",
            "COLLECTION", "POINTS", "CREATED", "ALIASES"
        );
        println!("  {}", "-".repeat(76));
        for info in &infos {
            print_row(info);
        }
    }

    println!();
    Ok(())
}

fn print_row(info: &CollectionInfo) {
    let created = chrono::DateTime::from_timestamp(info.created_at, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| info.created_at.to_string());
    let aliases = if info.aliases.is_empty() {
        "-".to_string()
    } else {
        info.aliases.join(", ")
    };
    println!(
        "  {:<32} {:>8}   {:<16}   {}",
        info.name, info.points, created, aliases
    );
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
