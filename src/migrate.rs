use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Collections and their immutable vector-space schema
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            schema_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Points; seq gives the stable storage order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS points (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            dense BLOB NOT NULL,
            sparse_json TEXT NOT NULL,
            multi BLOB NOT NULL,
            multi_tokens INTEGER NOT NULL,
            payload_json TEXT NOT NULL,
            UNIQUE(collection, id),
            FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aliases (
            alias TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_points_collection ON points(collection, seq)")
        .execute(pool)
        .await?;

    Ok(())
}
