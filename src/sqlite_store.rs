//! SQLite-backed [`VectorStore`] implementation.
//!
//! Points are stored one row each: the dense vector and the flattened
//! multivector as little-endian f32 BLOBs, the sparse vector and payload as
//! JSON. `seq` (AUTOINCREMENT) defines storage order for scroll and for
//! tie-breaking in search. Search loads the collection and evaluates the
//! request with the shared brute-force fusion engine.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use hybrid_rag_core::embedding::{blob_to_vec, vec_to_blob};
use hybrid_rag_core::fusion;
use hybrid_rag_core::models::{
    CollectionSchema, EmbeddedPoint, MultiVector, Payload, PointVectors, SparseVector,
};
use hybrid_rag_core::store::{PayloadRecord, ScoredPoint, ScrollPage, SearchRequest, VectorStore};

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Per-collection stats for `hrag stats`.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub points: i64,
    pub created_at: i64,
    pub aliases: Vec<String>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn resolve(&self, name: &str) -> Result<String> {
        Ok(self
            .resolve_alias(name)
            .await?
            .unwrap_or_else(|| name.to_string()))
    }

    /// Resolve `name` and fail if no such collection exists.
    async fn require(&self, name: &str) -> Result<(String, CollectionSchema)> {
        let real = self.resolve(name).await?;
        let row = sqlx::query("SELECT schema_json FROM collections WHERE name = ?")
            .bind(&real)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("collection '{name}' not found"))?;
        let schema_json: String = row.get("schema_json");
        let schema = serde_json::from_str(&schema_json)
            .with_context(|| format!("corrupt schema for collection '{real}'"))?;
        Ok((real, schema))
    }

    async fn load_points(&self, collection: &str) -> Result<Vec<EmbeddedPoint>> {
        let rows = sqlx::query(
            r#"
            SELECT id, dense, sparse_json, multi, multi_tokens, payload_json
            FROM points
            WHERE collection = ?
            ORDER BY seq
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_point).collect()
    }

    pub async fn collection_info(&self) -> Result<Vec<CollectionInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT c.name, c.created_at, COUNT(p.seq) AS points
            FROM collections c
            LEFT JOIN points p ON p.collection = c.name
            GROUP BY c.name
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("name");
            let aliases: Vec<String> =
                sqlx::query_scalar("SELECT alias FROM aliases WHERE collection = ? ORDER BY alias")
                    .bind(&name)
                    .fetch_all(&self.pool)
                    .await?;
            out.push(CollectionInfo {
                name,
                points: row.get("points"),
                created_at: row.get("created_at"),
                aliases,
            });
        }
        Ok(out)
    }
}

fn row_to_point(row: &SqliteRow) -> Result<EmbeddedPoint> {
    let id: String = row.get("id");
    let dense: Vec<u8> = row.get("dense");
    let sparse_json: String = row.get("sparse_json");
    let multi: Vec<u8> = row.get("multi");
    let multi_tokens: i64 = row.get("multi_tokens");
    let payload_json: String = row.get("payload_json");

    let flat = blob_to_vec(&multi);
    let tokens = multi_tokens.max(1) as usize;
    let late_interaction = MultiVector::from_flat(&flat, flat.len() / tokens)
        .ok_or_else(|| anyhow!("point {id}: corrupt multivector"))?;
    let sparse: SparseVector = serde_json::from_str(&sparse_json)
        .with_context(|| format!("point {id}: corrupt sparse vector"))?;
    let payload: Payload = serde_json::from_str(&payload_json)
        .with_context(|| format!("point {id}: corrupt payload"))?;

    Ok(EmbeddedPoint {
        id,
        vectors: PointVectors {
            dense: blob_to_vec(&dense),
            sparse,
            late_interaction,
        },
        payload,
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let real = self.resolve(name).await?;
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM collections WHERE name = ?")
            .bind(&real)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> Result<()> {
        if self.resolve_alias(name).await?.is_some() {
            bail!("'{name}' is already used as an alias");
        }
        let schema_json = serde_json::to_string(schema)?;
        let result = sqlx::query(
            "INSERT INTO collections (name, schema_json, created_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(&schema_json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                bail!("collection '{name}' already exists")
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        let real = self.resolve(name).await?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM aliases WHERE collection = ?")
            .bind(&real)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM points WHERE collection = ?")
            .bind(&real)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(&real)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn collection_schema(&self, name: &str) -> Result<Option<CollectionSchema>> {
        let real = self.resolve(name).await?;
        let schema_json: Option<String> =
            sqlx::query_scalar("SELECT schema_json FROM collections WHERE name = ?")
                .bind(&real)
                .fetch_optional(&self.pool)
                .await?;
        schema_json
            .map(|s| serde_json::from_str(&s).context("corrupt collection schema"))
            .transpose()
    }

    async fn upsert(&self, collection: &str, points: &[EmbeddedPoint]) -> Result<()> {
        let (real, schema) = self.require(collection).await?;

        for p in points {
            p.validate(&schema.spaces)
                .map_err(|e| anyhow!("point {}: {e}", p.id))?;
        }

        let mut tx = self.pool.begin().await?;
        for p in points {
            let multi = &p.vectors.late_interaction;
            sqlx::query(
                r#"
                INSERT INTO points (collection, id, dense, sparse_json, multi, multi_tokens, payload_json)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    dense = excluded.dense,
                    sparse_json = excluded.sparse_json,
                    multi = excluded.multi,
                    multi_tokens = excluded.multi_tokens,
                    payload_json = excluded.payload_json
                "#,
            )
            .bind(&real)
            .bind(&p.id)
            .bind(vec_to_blob(&p.vectors.dense))
            .bind(serde_json::to_string(&p.vectors.sparse)?)
            .bind(vec_to_blob(&multi.to_flat()))
            .bind(multi.len() as i64)
            .bind(serde_json::to_string(&p.payload)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn search(&self, collection: &str, request: &SearchRequest) -> Result<Vec<ScoredPoint>> {
        let (real, schema) = self.require(collection).await?;
        let points = self.load_points(&real).await?;
        fusion::evaluate(&points, &schema, request)
    }

    async fn scroll(
        &self,
        collection: &str,
        offset: Option<u64>,
        page_size: usize,
    ) -> Result<ScrollPage> {
        let (real, _) = self.require(collection).await?;
        let offset = offset.unwrap_or(0) as i64;

        // One extra row tells us whether another page exists
        let rows = sqlx::query(
            r#"
            SELECT id, payload_json FROM points
            WHERE collection = ?
            ORDER BY seq
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(&real)
        .bind(page_size as i64 + 1)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() > page_size && page_size > 0;
        let points = rows
            .iter()
            .take(page_size)
            .map(|row| {
                let id: String = row.get("id");
                let payload_json: String = row.get("payload_json");
                let payload = serde_json::from_str(&payload_json)
                    .with_context(|| format!("point {id}: corrupt payload"))?;
                Ok(PayloadRecord { id, payload })
            })
            .collect::<Result<Vec<_>>>()?;

        let next_offset = has_more.then(|| offset as u64 + page_size as u64);
        Ok(ScrollPage {
            points,
            next_offset,
        })
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let (real, _) = self.require(collection).await?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM points WHERE collection = ?")
            .bind(&real)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn set_alias(&self, alias: &str, collection: &str) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;

        let target_exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM collections WHERE name = ?")
                .bind(collection)
                .fetch_one(&mut *tx)
                .await?;
        if !target_exists {
            bail!("cannot alias missing collection '{collection}'");
        }
        let shadows: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM collections WHERE name = ?")
            .bind(alias)
            .fetch_one(&mut *tx)
            .await?;
        if shadows {
            bail!("'{alias}' is a collection name and cannot be used as an alias");
        }

        let previous: Option<String> =
            sqlx::query_scalar("SELECT collection FROM aliases WHERE alias = ?")
                .bind(alias)
                .fetch_optional(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO aliases (alias, collection) VALUES (?, ?)
            ON CONFLICT(alias) DO UPDATE SET collection = excluded.collection
            "#,
        )
        .bind(alias)
        .bind(collection)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(previous)
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>> {
        let target: Option<String> =
            sqlx::query_scalar("SELECT collection FROM aliases WHERE alias = ?")
                .bind(alias)
                .fetch_optional(&self.pool)
                .await?;
        Ok(target)
    }

    async fn delete_alias(&self, alias: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM aliases WHERE alias = ?")
            .bind(alias)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM collections ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }
}
