//! Tract-based local models.
//!
//! Pure-Rust path: loads ONNX models with tract-onnx, tokenizes with the
//! tokenizers crate, runs inference in spawn_blocking. No ONNX Runtime or
//! system deps. Provides the MiniLM dense fallback (musl, Intel Mac) and the
//! ColBERT v2 late-interaction encoder.
#![cfg_attr(
    all(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract"),
    allow(dead_code)
)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

use hybrid_rag_core::embedding::{normalize_l2, DenseEmbedder, LateInteractionEmbedder};
use hybrid_rag_core::models::MultiVector;

use crate::config::{DenseEmbeddingConfig, LateInteractionConfig};

const ALL_MINILM_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";
const ALL_MINILM_DIMS: usize = 384;
const DEFAULT_MAX_LEN: usize = 256;

const COLBERT_REPO: &str = "colbert-ir/colbertv2.0";
const COLBERT_DIMS: usize = 128;
const QUERY_MARKER_ID: i64 = 1;
const DOCUMENT_MARKER_ID: i64 = 2;
const MASK_ID: i64 = 103;
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Model manifest: name -> (repo, onnx path in repo, tokenizer path in repo, dims).
fn model_manifest(model_name: &str) -> Result<(&'static str, &'static str, &'static str, usize)> {
    match model_name {
        "all-minilm-l6-v2" => Ok((
            ALL_MINILM_REPO,
            "onnx/model.onnx",
            "tokenizer.json",
            ALL_MINILM_DIMS,
        )),
        "colbertv2.0" | "colbert-ir/colbertv2.0" => Ok((
            COLBERT_REPO,
            "model.onnx",
            "tokenizer.json",
            COLBERT_DIMS,
        )),
        _ => bail!(
            "Tract backend supports all-minilm-l6-v2 and colbertv2.0. Requested: '{}'",
            model_name
        ),
    }
}

pub(crate) fn cache_dir() -> Result<PathBuf> {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let dir = PathBuf::from(base)
        .join(".cache")
        .join("hybrid-rag")
        .join("models");
    std::fs::create_dir_all(&dir).map_err(|e| anyhow::anyhow!("Create cache dir: {}", e))?;
    Ok(dir)
}

pub(crate) fn download_to_cache(repo: &str, path: &str, cache_path: &Path) -> Result<()> {
    if cache_path.exists() {
        return Ok(());
    }
    let url = format!(
        "https://huggingface.co/{}/resolve/main/{}",
        repo,
        path.replace(' ', "%20")
    );
    tracing::info!(%url, "downloading model file");
    let resp = reqwest::blocking::get(&url)
        .map_err(|e| anyhow::anyhow!("Download {}: {}", url, e))?
        .error_for_status()
        .map_err(|e| anyhow::anyhow!("Download {}: {}", url, e))?;
    let bytes = resp
        .bytes()
        .map_err(|e| anyhow::anyhow!("Read body: {}", e))?;
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow::anyhow!("Create cache parent: {}", e))?;
    }
    std::fs::write(cache_path, &bytes).map_err(|e| anyhow::anyhow!("Write cache: {}", e))?;
    Ok(())
}

/// Ensure model and tokenizer are in cache; return (onnx path, tokenizer path).
fn ensure_cached(model_name: &str) -> Result<(PathBuf, PathBuf)> {
    let (repo, onnx_rel, tokenizer_rel, _) = model_manifest(model_name)?;
    let model_dir = cache_dir()?.join(repo.replace('/', "--"));
    let onnx_path = model_dir.join(onnx_rel);
    let tokenizer_path = model_dir.join(tokenizer_rel);
    download_to_cache(repo, onnx_rel, &onnx_path)?;
    download_to_cache(repo, tokenizer_rel, &tokenizer_path)?;
    Ok((onnx_path, tokenizer_path))
}

fn load_tokenizer(path: &Path) -> Result<tokenizers::Tokenizer> {
    tokenizers::Tokenizer::from_file(path).map_err(|e| anyhow::anyhow!("Load tokenizer: {}", e))
}

/// Load and optimize an ONNX model, returning its run function.
fn load_model(path: &Path) -> Result<impl Fn(TVec<TValue>) -> TractResult<TVec<TValue>>> {
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .map_err(|e| anyhow::anyhow!("Load ONNX: {}", e))?
        .into_optimized()
        .map_err(|e| anyhow::anyhow!("Optimize: {}", e))?
        .into_runnable()
        .map_err(|e| anyhow::anyhow!("Build tract runnable: {}", e))?;
    Ok(move |inputs: TVec<TValue>| model.run(inputs))
}

/// Run a padded `[batch, len]` id/mask pair and return the first output
/// as an owned `f32` array.
fn run_batch(
    model: &impl Fn(TVec<TValue>) -> TractResult<TVec<TValue>>,
    rows: &[(Vec<i64>, Vec<i64>)],
) -> Result<ndarray::ArrayD<f32>> {
    let max_len = rows.iter().map(|(ids, _)| ids.len()).max().unwrap_or(1).max(1);
    let batch = rows.len();
    let mut input_ids = vec![0i64; batch * max_len];
    let mut attention_mask = vec![0i64; batch * max_len];

    for (i, (ids, mask)) in rows.iter().enumerate() {
        for (j, (&id, &m)) in ids.iter().zip(mask.iter()).enumerate() {
            input_ids[i * max_len + j] = id;
            attention_mask[i * max_len + j] = m;
        }
    }

    let input_ids_tensor = ndarray::Array2::from_shape_vec((batch, max_len), input_ids)
        .map_err(|e| anyhow::anyhow!("Input ids shape: {}", e))?;
    let attention_mask_tensor = ndarray::Array2::from_shape_vec((batch, max_len), attention_mask)
        .map_err(|e| anyhow::anyhow!("Attention mask shape: {}", e))?;

    let input_ids_t: Tensor = input_ids_tensor.into();
    let attention_mask_t: Tensor = attention_mask_tensor.into();
    let result = model(tvec!(input_ids_t.into(), attention_mask_t.into()))?;

    let output = result
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No output tensor"))?;
    let view = output
        .to_array_view::<f32>()
        .map_err(|e| anyhow::anyhow!("Output to array: {}", e))?;
    Ok(view.to_owned())
}

// ============ Dense (MiniLM, mean pooling) ============

pub struct TractDenseEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
}

impl TractDenseEmbedder {
    pub fn new(config: &DenseEmbeddingConfig) -> Result<Self> {
        let (_, _, _, dims) = model_manifest(&config.model)?;
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
        })
    }
}

#[async_trait]
impl DenseEmbedder for TractDenseEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model_name = self.model_name.clone();
        let dims = self.dims;
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || run_dense(&model_name, dims, batch_size, &texts))
            .await?
    }
}

fn run_dense(
    model_name: &str,
    dims: usize,
    batch_size: usize,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let (onnx_path, tokenizer_path) = ensure_cached(model_name)?;
    let tokenizer = load_tokenizer(&tokenizer_path)?;
    let model = load_model(&onnx_path)?;

    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size.max(1)) {
        let rows = chunk
            .iter()
            .map(|s| {
                let enc = tokenizer
                    .encode(s.as_str(), true)
                    .map_err(|e| anyhow::anyhow!("Tokenize: {}", e))?;
                let ids: Vec<i64> = enc
                    .get_ids()
                    .iter()
                    .take(DEFAULT_MAX_LEN)
                    .map(|&id| id as i64)
                    .collect();
                let mask = vec![1i64; ids.len()];
                Ok((ids, mask))
            })
            .collect::<Result<Vec<_>>>()?;

        let view = run_batch(&model, &rows)?;

        // Output shape is [batch, seq_len, dims] (last_hidden_state) or
        // [batch, dims] (sentence_embedding). Mean-pool the former.
        let shape = view.shape().to_vec();
        if shape.len() == 2 {
            for i in 0..shape[0] {
                let mut vec: Vec<f32> = view.slice(ndarray::s![i, ..]).iter().copied().collect();
                normalize_l2(&mut vec);
                all_embeddings.push(vec);
            }
        } else if shape.len() == 3 {
            for (i, (ids, _)) in rows.iter().enumerate() {
                let valid_len = ids.len().min(shape[1]);
                let mut sum = vec![0f32; dims];
                for j in 0..valid_len {
                    for (k, &v) in view.slice(ndarray::s![i, j, ..]).iter().enumerate() {
                        if k < dims {
                            sum[k] += v;
                        }
                    }
                }
                if valid_len > 0 {
                    for x in &mut sum {
                        *x /= valid_len as f32;
                    }
                }
                normalize_l2(&mut sum);
                all_embeddings.push(sum);
            }
        } else {
            bail!("Unexpected output shape: {:?}", shape);
        }
    }

    Ok(all_embeddings)
}

// ============ Late interaction (ColBERT v2) ============

/// ColBERT encoder.
///
/// Queries: `[CLS] [Q] tokens… [SEP]` padded with `[MASK]` to
/// `query_tokens`, every position attended and kept. Documents:
/// `[CLS] [D] tokens… [SEP]` truncated to `max_doc_tokens`, with
/// punctuation tokens dropped from the output. Every token vector is
/// L2-normalized.
pub struct ColbertEmbedder {
    model_name: String,
    dims: usize,
    query_tokens: usize,
    max_doc_tokens: usize,
    batch_size: usize,
}

#[derive(Clone, Copy)]
enum ColbertMode {
    Query,
    Document,
}

impl ColbertEmbedder {
    pub fn new(config: &LateInteractionConfig) -> Result<Self> {
        let (_, _, _, dims) = model_manifest(&config.model)?;
        if dims != config.dims {
            bail!(
                "embedding.late_interaction.dims = {} but {} produces {} dimensions",
                config.dims,
                config.model,
                dims
            );
        }
        Ok(Self {
            model_name: config.model.clone(),
            dims,
            query_tokens: config.query_tokens,
            max_doc_tokens: config.max_doc_tokens,
            batch_size: config.batch_size,
        })
    }

    async fn encode(&self, texts: Vec<String>, mode: ColbertMode) -> Result<Vec<MultiVector>> {
        let model_name = self.model_name.clone();
        let dims = self.dims;
        let limits = (self.query_tokens, self.max_doc_tokens, self.batch_size);

        tokio::task::spawn_blocking(move || run_colbert(&model_name, dims, limits, &texts, mode))
            .await?
    }
}

#[async_trait]
impl LateInteractionEmbedder for ColbertEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<MultiVector>> {
        self.encode(texts.to_vec(), ColbertMode::Document).await
    }

    async fn embed_query(&self, text: &str) -> Result<MultiVector> {
        self.encode(vec![text.to_string()], ColbertMode::Query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("ColBERT returned no query encoding"))
    }
}

/// Token ids with the marker inserted after `[CLS]`, plus the attention mask.
fn colbert_row(ids: &[u32], mode: ColbertMode, query_tokens: usize, max_doc: usize) -> (Vec<i64>, Vec<i64>) {
    let marker = match mode {
        ColbertMode::Query => QUERY_MARKER_ID,
        ColbertMode::Document => DOCUMENT_MARKER_ID,
    };
    let mut out: Vec<i64> = Vec::with_capacity(ids.len() + 1);
    if let Some((&cls, rest)) = ids.split_first() {
        out.push(cls as i64);
        out.push(marker);
        out.extend(rest.iter().map(|&id| id as i64));
    }

    match mode {
        ColbertMode::Query => {
            out.truncate(query_tokens.max(2));
            while out.len() < query_tokens {
                out.push(MASK_ID);
            }
        }
        ColbertMode::Document => out.truncate(max_doc.max(2)),
    }
    let mask = vec![1i64; out.len()];
    (out, mask)
}

fn run_colbert(
    model_name: &str,
    dims: usize,
    (query_tokens, max_doc_tokens, batch_size): (usize, usize, usize),
    texts: &[String],
    mode: ColbertMode,
) -> Result<Vec<MultiVector>> {
    let (onnx_path, tokenizer_path) = ensure_cached(model_name)?;
    let tokenizer = load_tokenizer(&tokenizer_path)?;
    let model = load_model(&onnx_path)?;

    let skip: Vec<i64> = PUNCTUATION
        .chars()
        .filter_map(|c| tokenizer.token_to_id(&c.to_string()))
        .map(|id| id as i64)
        .collect();

    let mut out = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size.max(1)) {
        let rows = chunk
            .iter()
            .map(|s| {
                let enc = tokenizer
                    .encode(s.as_str(), true)
                    .map_err(|e| anyhow::anyhow!("Tokenize: {}", e))?;
                Ok(colbert_row(enc.get_ids(), mode, query_tokens, max_doc_tokens))
            })
            .collect::<Result<Vec<_>>>()?;

        let view = run_batch(&model, &rows)?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[2] != dims {
            bail!("Unexpected ColBERT output shape: {:?}", shape);
        }

        for (i, (ids, _)) in rows.iter().enumerate() {
            let mut tokens = Vec::with_capacity(ids.len());
            for (j, id) in ids.iter().enumerate().take(shape[1]) {
                if matches!(mode, ColbertMode::Document) && skip.contains(id) {
                    continue;
                }
                let mut v: Vec<f32> = view.slice(ndarray::s![i, j, ..]).iter().copied().collect();
                normalize_l2(&mut v);
                tokens.push(v);
            }
            out.push(MultiVector::new(tokens));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_row_marker_and_mask_padding() {
        let (ids, mask) = colbert_row(&[101, 2054, 102], ColbertMode::Query, 8, 180);
        assert_eq!(ids, vec![101, QUERY_MARKER_ID, 2054, 102, 103, 103, 103, 103]);
        assert_eq!(mask, vec![1; 8]);
    }

    #[test]
    fn test_document_row_truncates() {
        let (ids, _) = colbert_row(&[101, 5, 6, 7, 102], ColbertMode::Document, 32, 4);
        assert_eq!(ids, vec![101, DOCUMENT_MARKER_ID, 5, 6]);
    }

    #[test]
    fn test_manifest_rejects_unknown_model() {
        assert!(model_manifest("gpt-embed").is_err());
        assert_eq!(model_manifest("colbertv2.0").unwrap().3, 128);
    }
}
