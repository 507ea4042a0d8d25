//! TOML configuration.
//!
//! Every section is optional; missing values take the defaults below.
//! [`load_config`] parses and validates a file, [`Config::default`] gives
//! the same values without one.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use hybrid_rag_core::models::SpaceNames;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub summarize: SummarizeConfig,
    #[serde(default)]
    pub vector_spaces: VectorSpacesConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub intent: IntentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/hrag.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Points per upsert batch.
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: default_index_batch_size(),
        }
    }
}

fn default_index_batch_size() -> usize {
    10
}

/// Limits for interactive search.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_search_prefetch")]
    pub prefetch_limit: usize,
    #[serde(default = "default_search_final")]
    pub final_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            prefetch_limit: default_search_prefetch(),
            final_limit: default_search_final(),
        }
    }
}

fn default_search_prefetch() -> usize {
    20
}
fn default_search_final() -> usize {
    10
}

/// Limits for the chat-serving path, tuned for latency.
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_prefetch")]
    pub prefetch_limit: usize,
    #[serde(default = "default_chat_final")]
    pub final_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            prefetch_limit: default_chat_prefetch(),
            final_limit: default_chat_final(),
        }
    }
}

fn default_chat_prefetch() -> usize {
    10
}
fn default_chat_final() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizeConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// `"heuristic"`, or a Hugging Face repo / local `tokenizer.json`
    /// (tract feature).
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            page_size: default_page_size(),
            tokenizer: default_tokenizer(),
        }
    }
}

fn default_max_tokens() -> usize {
    120_000
}
fn default_page_size() -> usize {
    1000
}
fn default_tokenizer() -> String {
    "heuristic".to_string()
}

/// Names of the three vector spaces declared on new collections.
#[derive(Debug, Deserialize, Clone)]
pub struct VectorSpacesConfig {
    #[serde(default = "default_dense_space")]
    pub dense: String,
    #[serde(default = "default_sparse_space")]
    pub sparse: String,
    #[serde(default = "default_late_space")]
    pub late_interaction: String,
}

impl Default for VectorSpacesConfig {
    fn default() -> Self {
        Self {
            dense: default_dense_space(),
            sparse: default_sparse_space(),
            late_interaction: default_late_space(),
        }
    }
}

impl VectorSpacesConfig {
    pub fn names(&self) -> SpaceNames {
        SpaceNames {
            dense: self.dense.clone(),
            sparse: self.sparse.clone(),
            late_interaction: self.late_interaction.clone(),
        }
    }
}

fn default_dense_space() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_sparse_space() -> String {
    "bm25".to_string()
}
fn default_late_space() -> String {
    "colbertv2.0".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub dense: DenseEmbeddingConfig,
    #[serde(default)]
    pub sparse: SparseEmbeddingConfig,
    #[serde(default)]
    pub late_interaction: LateInteractionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DenseEmbeddingConfig {
    /// `hashed`, `local`, `openai` or `ollama`.
    #[serde(default = "default_dense_provider")]
    pub provider: String,
    #[serde(default = "default_dense_model")]
    pub model: String,
    #[serde(default = "default_dense_dims")]
    pub dims: usize,
    /// Ollama base URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for DenseEmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_dense_provider(),
            model: default_dense_model(),
            dims: default_dense_dims(),
            url: None,
            batch_size: default_embed_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

fn default_dense_provider() -> String {
    "local".to_string()
}
fn default_dense_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_dense_dims() -> usize {
    384
}
fn default_embed_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SparseEmbeddingConfig {
    #[serde(default = "default_sparse_provider")]
    pub provider: String,
    #[serde(default = "default_k1")]
    pub k1: f32,
    #[serde(default = "default_b")]
    pub b: f32,
    #[serde(default = "default_avg_len")]
    pub avg_len: f32,
}

impl Default for SparseEmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_sparse_provider(),
            k1: default_k1(),
            b: default_b(),
            avg_len: default_avg_len(),
        }
    }
}

fn default_sparse_provider() -> String {
    "bm25".to_string()
}
fn default_k1() -> f32 {
    1.2
}
fn default_b() -> f32 {
    0.75
}
fn default_avg_len() -> f32 {
    256.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct LateInteractionConfig {
    /// `hashed` or `local`.
    #[serde(default = "default_late_provider")]
    pub provider: String,
    #[serde(default = "default_late_model")]
    pub model: String,
    #[serde(default = "default_late_dims")]
    pub dims: usize,
    /// Query length after `[MASK]` padding.
    #[serde(default = "default_query_tokens")]
    pub query_tokens: usize,
    #[serde(default = "default_doc_tokens")]
    pub max_doc_tokens: usize,
    #[serde(default = "default_late_batch_size")]
    pub batch_size: usize,
}

impl Default for LateInteractionConfig {
    fn default() -> Self {
        Self {
            provider: default_late_provider(),
            model: default_late_model(),
            dims: default_late_dims(),
            query_tokens: default_query_tokens(),
            max_doc_tokens: default_doc_tokens(),
            batch_size: default_late_batch_size(),
        }
    }
}

fn default_late_provider() -> String {
    "local".to_string()
}
fn default_late_model() -> String {
    "colbertv2.0".to_string()
}
fn default_late_dims() -> usize {
    128
}
fn default_query_tokens() -> usize {
    32
}
fn default_doc_tokens() -> usize {
    180
}
fn default_late_batch_size() -> usize {
    16
}

/// Ollama text generation.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_generation_model(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_generation_model() -> String {
    "gemma3:4b".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generation_timeout() -> u64 {
    120
}
fn default_generation_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntentConfig {
    /// `disabled` or `ollama`.
    #[serde(default = "default_intent_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Defaults to `generation.url`.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            provider: default_intent_provider(),
            model: default_generation_model(),
            url: None,
        }
    }
}

fn default_intent_provider() -> String {
    "disabled".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.index.batch_size == 0 {
        bail!("index.batch_size must be > 0");
    }

    if config.retrieval.prefetch_limit == 0 || config.retrieval.final_limit == 0 {
        bail!("retrieval.prefetch_limit and retrieval.final_limit must be >= 1");
    }
    if config.chat.prefetch_limit == 0 || config.chat.final_limit == 0 {
        bail!("chat.prefetch_limit and chat.final_limit must be >= 1");
    }

    if config.summarize.max_tokens == 0 {
        bail!("summarize.max_tokens must be > 0");
    }
    if config.summarize.page_size == 0 {
        bail!("summarize.page_size must be > 0");
    }

    let spaces = &config.vector_spaces;
    let names = [&spaces.dense, &spaces.sparse, &spaces.late_interaction];
    if names.iter().any(|n| n.trim().is_empty()) {
        bail!("vector_spaces names must not be empty");
    }
    if names.iter().collect::<HashSet<_>>().len() != names.len() {
        bail!("vector_spaces names must be distinct");
    }

    let dense = &config.embedding.dense;
    match dense.provider.as_str() {
        "hashed" | "local" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown dense embedding provider: '{}'. Must be hashed, local, openai, or ollama.",
            other
        ),
    }
    if dense.dims == 0 {
        bail!("embedding.dense.dims must be > 0");
    }
    if dense.batch_size == 0 {
        bail!("embedding.dense.batch_size must be > 0");
    }

    match config.embedding.sparse.provider.as_str() {
        "bm25" => {}
        other => bail!("Unknown sparse embedding provider: '{}'. Must be bm25.", other),
    }

    let late = &config.embedding.late_interaction;
    match late.provider.as_str() {
        "hashed" | "local" => {}
        other => bail!(
            "Unknown late_interaction embedding provider: '{}'. Must be hashed or local.",
            other
        ),
    }
    if late.dims == 0 {
        bail!("embedding.late_interaction.dims must be > 0");
    }
    if late.batch_size == 0 || late.query_tokens == 0 || late.max_doc_tokens == 0 {
        bail!("embedding.late_interaction batch_size, query_tokens and max_doc_tokens must be > 0");
    }

    match config.intent.provider.as_str() {
        "disabled" | "ollama" => {}
        other => bail!(
            "Unknown intent provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    Ok(())
}
