//! In-memory [`VectorStore`] implementation for tests and ephemeral use.
//!
//! Collections are `Vec`s of points in insertion order behind a
//! `std::sync::RwLock`. Search is delegated to [`crate::fusion::evaluate`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::fusion;
use crate::models::{CollectionSchema, EmbeddedPoint};

use super::{PayloadRecord, ScoredPoint, ScrollPage, SearchRequest, VectorStore};

struct StoredCollection {
    schema: CollectionSchema,
    points: Vec<EmbeddedPoint>,
    /// Point id -> position in `points`.
    positions: HashMap<String, usize>,
}

#[derive(Default)]
struct State {
    collections: BTreeMap<String, StoredCollection>,
    aliases: HashMap<String, String>,
}

impl State {
    fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    fn collection(&self, name: &str) -> Result<&StoredCollection> {
        let real = self.resolve(name);
        self.collections
            .get(real)
            .ok_or_else(|| anyhow!("collection '{name}' not found"))
    }
}

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let state = self.read()?;
        Ok(state.collections.contains_key(state.resolve(name)))
    }

    async fn create_collection(&self, name: &str, schema: &CollectionSchema) -> Result<()> {
        let mut state = self.write()?;
        if state.collections.contains_key(name) {
            bail!("collection '{name}' already exists");
        }
        if state.aliases.contains_key(name) {
            bail!("'{name}' is already used as an alias");
        }
        state.collections.insert(
            name.to_string(),
            StoredCollection {
                schema: schema.clone(),
                points: Vec::new(),
                positions: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        let mut state = self.write()?;
        let real = state.resolve(name).to_string();
        if state.collections.remove(&real).is_none() {
            return Ok(false);
        }
        state.aliases.retain(|_, target| *target != real);
        Ok(true)
    }

    async fn collection_schema(&self, name: &str) -> Result<Option<CollectionSchema>> {
        let state = self.read()?;
        Ok(state
            .collections
            .get(state.resolve(name))
            .map(|c| c.schema.clone()))
    }

    async fn upsert(&self, collection: &str, points: &[EmbeddedPoint]) -> Result<()> {
        let mut state = self.write()?;
        let real = state.resolve(collection).to_string();
        let stored = state
            .collections
            .get_mut(&real)
            .ok_or_else(|| anyhow!("collection '{collection}' not found"))?;

        for p in points {
            p.validate(&stored.schema.spaces)
                .map_err(|e| anyhow!("point {}: {e}", p.id))?;
        }

        for p in points {
            match stored.positions.get(&p.id) {
                Some(&pos) => stored.points[pos] = p.clone(),
                None => {
                    stored.positions.insert(p.id.clone(), stored.points.len());
                    stored.points.push(p.clone());
                }
            }
        }
        Ok(())
    }

    async fn search(&self, collection: &str, request: &SearchRequest) -> Result<Vec<ScoredPoint>> {
        let state = self.read()?;
        let stored = state.collection(collection)?;
        fusion::evaluate(&stored.points, &stored.schema, request)
    }

    async fn scroll(
        &self,
        collection: &str,
        offset: Option<u64>,
        page_size: usize,
    ) -> Result<ScrollPage> {
        let state = self.read()?;
        let stored = state.collection(collection)?;
        let start = offset.unwrap_or(0) as usize;
        let end = start.saturating_add(page_size).min(stored.points.len());
        let points = stored
            .points
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|p| PayloadRecord {
                id: p.id.clone(),
                payload: p.payload.clone(),
            })
            .collect();
        let next_offset = (end < stored.points.len() && page_size > 0).then_some(end as u64);
        Ok(ScrollPage {
            points,
            next_offset,
        })
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let state = self.read()?;
        Ok(state.collection(collection)?.points.len() as u64)
    }

    async fn set_alias(&self, alias: &str, collection: &str) -> Result<Option<String>> {
        let mut state = self.write()?;
        if !state.collections.contains_key(collection) {
            bail!("cannot alias missing collection '{collection}'");
        }
        if state.collections.contains_key(alias) {
            bail!("'{alias}' is a collection name and cannot be used as an alias");
        }
        Ok(state
            .aliases
            .insert(alias.to_string(), collection.to_string()))
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>> {
        Ok(self.read()?.aliases.get(alias).cloned())
    }

    async fn delete_alias(&self, alias: &str) -> Result<bool> {
        Ok(self.write()?.aliases.remove(alias).is_some())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.read()?.collections.keys().cloned().collect())
    }
}
