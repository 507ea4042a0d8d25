//! Concrete embedding providers and the config-driven [`create_embedder`].
//!
//! | Space | Provider | Backend |
//! |-------|----------|---------|
//! | dense | `hashed` | [`HashedDenseEmbedder`] (offline, deterministic) |
//! | dense | `local` | fastembed (default feature) or tract MiniLM |
//! | dense | `openai` | [`OpenAIEmbedder`], `POST /v1/embeddings` |
//! | dense | `ollama` | [`OllamaEmbedder`], `POST /api/embed` |
//! | sparse | `bm25` | [`Bm25Embedder`] |
//! | late interaction | `hashed` | [`HashedTokenEmbedder`] |
//! | late interaction | `local` | ColBERT v2 via tract (`local-embeddings-tract`) |
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers retry through [`crate::http`]: 429, 5xx
//! and network errors back off exponentially; other 4xx fail immediately.

#[cfg(feature = "local-embeddings-tract")]
mod local_tract;

#[cfg(feature = "local-embeddings-tract")]
pub(crate) use local_tract::{cache_dir, download_to_cache};

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use hybrid_rag_core::bm25::Bm25Embedder;
use hybrid_rag_core::embedding::{
    DenseEmbedder, Embedder, LateInteractionEmbedder, SparseEmbedder,
};
use hybrid_rag_core::hashing::{HashedDenseEmbedder, HashedTokenEmbedder};

use crate::config::{
    DenseEmbeddingConfig, EmbeddingConfig, LateInteractionConfig, SparseEmbeddingConfig,
};
use crate::http;

// ============ OpenAI ============

/// Dense embeddings from the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &DenseEmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            api_key,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl DenseEmbedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = http::send_json_with_retry(
                || {
                    self.client
                        .post("https://api.openai.com/v1/embeddings")
                        .header("Authorization", format!("Bearer {}", self.api_key))
                        .json(&body)
                },
                self.max_retries,
                "OpenAI",
            )
            .await?;
            out.extend(parse_openai_response(&json)?);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        indexed.push((index, to_f32_vec(embedding)));
    }
    indexed.sort_by_key(|(i, _)| *i);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Dense embeddings from a local Ollama instance.
///
/// Requires Ollama running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &DenseEmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl DenseEmbedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = http::send_json_with_retry(
                || self.client.post(&endpoint).json(&body),
                self.max_retries,
                "Ollama",
            )
            .await
            .map_err(|e| e.context(format!("is Ollama running at {}?", self.url)))?;
            out.extend(parse_ollama_response(&json)?);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|a| to_f32_vec(a))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Local (fastembed) ============

/// Dense embeddings computed locally with fastembed.
///
/// The model is downloaded from Hugging Face on first use and kept loaded
/// for the lifetime of the embedder.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct FastembedEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl FastembedEmbedder {
    pub fn new(config: &DenseEmbeddingConfig) -> Result<Self> {
        let (_, dims) = fastembed_model(&config.model)?;
        if dims != config.dims {
            bail!(
                "embedding.dense.dims = {} but {} produces {} dimensions",
                config.dims,
                config.model,
                dims
            );
        }
        Ok(Self {
            model_name: config.model.clone(),
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    match name {
        "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((fastembed::EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((fastembed::EmbeddingModel::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((fastembed::EmbeddingModel::MultilingualE5Small, 384)),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl DenseEmbedder for FastembedEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let (fastembed_model, _) = fastembed_model(&self.model_name)?;
        let batch_size = self.batch_size;
        let slot = self.model.clone();
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model not loaded"))?;

            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

// ============ Factory ============

pub fn create_dense(config: &DenseEmbeddingConfig) -> Result<Arc<dyn DenseEmbedder>> {
    match config.provider.as_str() {
        "hashed" => Ok(Arc::new(HashedDenseEmbedder::new(config.dims))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "local" => create_local_dense(config),
        other => bail!("Unknown dense embedding provider: {}", other),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn create_local_dense(config: &DenseEmbeddingConfig) -> Result<Arc<dyn DenseEmbedder>> {
    Ok(Arc::new(FastembedEmbedder::new(config)?))
}

#[cfg(all(
    feature = "local-embeddings-tract",
    not(feature = "local-embeddings-fastembed")
))]
fn create_local_dense(config: &DenseEmbeddingConfig) -> Result<Arc<dyn DenseEmbedder>> {
    Ok(Arc::new(local_tract::TractDenseEmbedder::new(config)?))
}

#[cfg(not(any(
    feature = "local-embeddings-fastembed",
    feature = "local-embeddings-tract"
)))]
fn create_local_dense(_config: &DenseEmbeddingConfig) -> Result<Arc<dyn DenseEmbedder>> {
    bail!(
        "Local dense provider requires one of: --features local-embeddings-fastembed, --features local-embeddings-tract"
    )
}

pub fn create_sparse(config: &SparseEmbeddingConfig) -> Result<Arc<dyn SparseEmbedder>> {
    match config.provider.as_str() {
        "bm25" => Ok(Arc::new(Bm25Embedder {
            k1: config.k1,
            b: config.b,
            avg_len: config.avg_len,
        })),
        other => bail!("Unknown sparse embedding provider: {}", other),
    }
}

pub fn create_late_interaction(
    config: &LateInteractionConfig,
) -> Result<Arc<dyn LateInteractionEmbedder>> {
    match config.provider.as_str() {
        "hashed" => Ok(Arc::new(HashedTokenEmbedder::new(config.dims))),
        #[cfg(feature = "local-embeddings-tract")]
        "local" => Ok(Arc::new(local_tract::ColbertEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-tract"))]
        "local" => bail!(
            "Local late-interaction provider (ColBERT) requires --features local-embeddings-tract"
        ),
        other => bail!("Unknown late_interaction embedding provider: {}", other),
    }
}

/// Build the three-model [`Embedder`] from configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Embedder> {
    let embedder = Embedder::new(
        create_dense(&config.dense)?,
        create_sparse(&config.sparse)?,
        create_late_interaction(&config.late_interaction)?,
    );
    tracing::debug!(models = %embedder.identity(), "embedder ready");
    Ok(embedder)
}
