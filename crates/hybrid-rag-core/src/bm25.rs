//! BM25 sparse encoder.
//!
//! Documents get BM25 term-frequency saturation weights; the collection-side
//! IDF modifier supplies the inverse document frequency at query time, so a
//! stored vector never has to be rewritten as the corpus grows. Query terms
//! are weighted `1.0` each.
//!
//! Term ids are the low 32 bits of a SHA-256 hash of the lowercased word.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::SparseEmbedder;
use crate::hashing::stable_hash;
use crate::models::SparseVector;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// Lowercased runs of alphanumeric characters.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Words with stopwords removed.
///
/// If every word is a stopword they are all kept. Text without any word
/// characters becomes a single term for the trimmed lowercased text, so a
/// document's sparse vector is never empty.
pub fn tokenize(text: &str) -> Vec<String> {
    let all = words(text);
    if all.is_empty() {
        return vec![text.trim().to_lowercase()];
    }
    let kept: Vec<String> = all
        .iter()
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .cloned()
        .collect();
    if kept.is_empty() {
        all
    } else {
        kept
    }
}

pub fn term_id(term: &str) -> u32 {
    (stable_hash(term) & 0xffff_ffff) as u32
}

#[derive(Debug, Clone)]
pub struct Bm25Embedder {
    pub k1: f32,
    pub b: f32,
    /// Expected average document length in terms.
    pub avg_len: f32,
}

impl Default for Bm25Embedder {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            avg_len: 256.0,
        }
    }
}

impl Bm25Embedder {
    pub fn embed_document(&self, text: &str) -> SparseVector {
        let terms = tokenize(text);
        let doc_len = terms.len() as f32;
        let mut tf: HashMap<u32, f32> = HashMap::new();
        for t in &terms {
            *tf.entry(term_id(t)).or_insert(0.0) += 1.0;
        }
        let norm = self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_len);
        SparseVector::from_pairs(
            tf.into_iter()
                .map(|(id, f)| (id, f * (self.k1 + 1.0) / (f + norm))),
        )
    }

    /// Terms come from the same [`tokenize`] as documents.
    pub fn embed_query_text(&self, text: &str) -> SparseVector {
        let mut ids: Vec<u32> = tokenize(text).iter().map(|t| term_id(t)).collect();
        ids.sort_unstable();
        ids.dedup();
        let values = vec![1.0; ids.len()];
        SparseVector::new(ids, values)
    }
}

#[async_trait]
impl SparseEmbedder for Bm25Embedder {
    fn model_name(&self) -> &str {
        "bm25"
    }

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        Ok(texts.iter().map(|t| self.embed_document(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<SparseVector> {
        Ok(self.embed_query_text(text))
    }
}
