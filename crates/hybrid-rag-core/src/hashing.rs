//! Offline embedders based on the hashing trick.
//!
//! These need no model files or network access. They are used for tests,
//! air-gapped setups and as the `hashed` provider in the app crate. Quality
//! is lexical (word and character-trigram overlap), which is enough to
//! exercise the full two-stage pipeline deterministically.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::bm25::words;
use crate::embedding::{normalize_l2, DenseEmbedder, LateInteractionEmbedder};
use crate::models::MultiVector;

/// Deterministic 64-bit hash of a string (first 8 bytes of SHA-256).
pub fn stable_hash(s: &str) -> u64 {
    let digest = Sha256::digest(s.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Character trigrams of `#word#`.
fn trigrams(word: &str) -> Vec<String> {
    let padded: Vec<char> = format!("#{word}#").chars().collect();
    if padded.len() < 3 {
        return vec![padded.iter().collect()];
    }
    padded.windows(3).map(|w| w.iter().collect()).collect()
}

/// Add a signed unit contribution for `feature` into `out`.
fn accumulate(out: &mut [f32], feature: &str, weight: f32) {
    let h = stable_hash(feature);
    let bucket = (h % out.len() as u64) as usize;
    let sign = if (h >> 63) & 1 == 1 { -1.0 } else { 1.0 };
    out[bucket] += sign * weight;
}

/// Bag of words and character trigrams hashed into a fixed-width unit vector.
pub struct HashedDenseEmbedder {
    dims: usize,
    name: String,
}

impl HashedDenseEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            name: format!("hashed-dense-{}", dims.max(1)),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dims];
        for word in words(text) {
            accumulate(&mut out, &format!("w:{word}"), 1.0);
            for tri in trigrams(&word) {
                accumulate(&mut out, &format!("t:{tri}"), 0.5);
            }
        }
        normalize_l2(&mut out);
        out
    }
}

#[async_trait]
impl DenseEmbedder for HashedDenseEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// One hashed trigram vector per word.
///
/// Text without any word characters yields a single token for the whole
/// (trimmed, lowercased) string so the multivector is never empty.
pub struct HashedTokenEmbedder {
    dims: usize,
    name: String,
}

impl HashedTokenEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            name: format!("hashed-tokens-{}", dims.max(1)),
        }
    }

    fn token_vector(&self, word: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dims];
        accumulate(&mut out, &format!("w:{word}"), 1.0);
        for tri in trigrams(word) {
            accumulate(&mut out, &format!("t:{tri}"), 1.0);
        }
        normalize_l2(&mut out);
        out
    }

    pub fn embed_one(&self, text: &str) -> MultiVector {
        let mut tokens = words(text);
        if tokens.is_empty() {
            tokens.push(text.trim().to_lowercase());
        }
        MultiVector::new(tokens.iter().map(|w| self.token_vector(w)).collect())
    }
}

#[async_trait]
impl LateInteractionEmbedder for HashedTokenEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<MultiVector>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<MultiVector> {
        Ok(self.embed_one(text))
    }
}
