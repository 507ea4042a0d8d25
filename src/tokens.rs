//! Token counters for the summarization budget.
//!
//! `summarize.tokenizer = "heuristic"` counts roughly four characters per
//! token. With the `local-embeddings-tract` feature, any other value names
//! either a local `tokenizer.json` or a Hugging Face repo whose
//! `tokenizer.json` is downloaded into the model cache on first use.

use anyhow::Result;
use std::sync::Arc;

use hybrid_rag_core::summarize::{HeuristicTokenCounter, TokenCounter};

use crate::config::SummarizeConfig;

pub async fn create_token_counter(config: &SummarizeConfig) -> Result<Arc<dyn TokenCounter>> {
    match config.tokenizer.as_str() {
        "heuristic" => Ok(Arc::new(HeuristicTokenCounter)),
        other => load_hf_counter(other).await,
    }
}

#[cfg(feature = "local-embeddings-tract")]
async fn load_hf_counter(name: &str) -> Result<Arc<dyn TokenCounter>> {
    let name = name.to_string();
    let counter = tokio::task::spawn_blocking(move || HfTokenCounter::load(&name)).await??;
    Ok(Arc::new(counter))
}

#[cfg(not(feature = "local-embeddings-tract"))]
async fn load_hf_counter(name: &str) -> Result<Arc<dyn TokenCounter>> {
    anyhow::bail!(
        "Tokenizer '{}' requires --features local-embeddings-tract (or use \"heuristic\")",
        name
    )
}

/// Counts with a Hugging Face `tokenizers` tokenizer, without special tokens.
#[cfg(feature = "local-embeddings-tract")]
pub struct HfTokenCounter {
    tokenizer: tokenizers::Tokenizer,
}

#[cfg(feature = "local-embeddings-tract")]
impl HfTokenCounter {
    /// `name` is a path to `tokenizer.json` or a Hugging Face repo id.
    pub fn load(name: &str) -> Result<Self> {
        let local = std::path::Path::new(name);
        let path = if local.is_file() {
            local.to_path_buf()
        } else {
            let cached = crate::embedding::cache_dir()?
                .join(name.replace('/', "--"))
                .join("tokenizer.json");
            crate::embedding::download_to_cache(name, "tokenizer.json", &cached)?;
            cached
        };
        let tokenizer = tokenizers::Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Load tokenizer {}: {}", path.display(), e))?;
        tracing::debug!(tokenizer = %name, "token counter ready");
        Ok(Self { tokenizer })
    }
}

#[cfg(feature = "local-embeddings-tract")]
impl TokenCounter for HfTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                tracing::warn!(error = %e, "tokenizer failed, falling back to heuristic count");
                HeuristicTokenCounter.count_tokens(text)
            }
        }
    }
}
