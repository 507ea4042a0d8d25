//! Embedding traits, the three-model [`Embedder`] bundle and vector
//! serialization helpers.
//!
//! Each representation has its own trait ([`DenseEmbedder`],
//! [`SparseEmbedder`], [`LateInteractionEmbedder`]) so backends can be mixed
//! freely. Concrete network and ONNX backends live in the `hybrid-rag` app
//! crate; the offline backends in [`crate::bm25`] and [`crate::hashing`]
//! live here.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::error::EmbeddingError;
use crate::models::{ModelIdentity, MultiVector, PointVectors, SparseVector};

/// One dense vector per text.
#[async_trait]
pub trait DenseEmbedder: Send + Sync {
    /// Model identifier (e.g. `"sentence-transformers/all-MiniLM-L6-v2"`).
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_passages(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("{} returned no vector for the query", self.model_name()))
    }
}

/// One sparse bag-of-terms vector per text.
#[async_trait]
pub trait SparseEmbedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<SparseVector>>;

    /// Queries may be weighted differently from passages (BM25 weights
    /// query terms uniformly).
    async fn embed_query(&self, text: &str) -> Result<SparseVector>;
}

/// One multivector (a vector per token) per text.
#[async_trait]
pub trait LateInteractionEmbedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    async fn embed_passages(&self, texts: &[String]) -> Result<Vec<MultiVector>>;

    /// Queries use a distinct encoding path from documents.
    async fn embed_query(&self, text: &str) -> Result<MultiVector>;
}

/// The three embedding models used together for indexing and querying.
#[derive(Clone)]
pub struct Embedder {
    dense: Arc<dyn DenseEmbedder>,
    sparse: Arc<dyn SparseEmbedder>,
    late_interaction: Arc<dyn LateInteractionEmbedder>,
}

impl Embedder {
    pub fn new(
        dense: Arc<dyn DenseEmbedder>,
        sparse: Arc<dyn SparseEmbedder>,
        late_interaction: Arc<dyn LateInteractionEmbedder>,
    ) -> Self {
        Self {
            dense,
            sparse,
            late_interaction,
        }
    }

    pub fn identity(&self) -> ModelIdentity {
        ModelIdentity {
            dense: self.dense.model_name().to_string(),
            sparse: self.sparse.model_name().to_string(),
            late_interaction: self.late_interaction.model_name().to_string(),
        }
    }

    pub fn dense_dims(&self) -> usize {
        self.dense.dims()
    }

    pub fn late_interaction_dims(&self) -> usize {
        self.late_interaction.dims()
    }

    /// Embed document texts with all three models, one [`PointVectors`] per
    /// input text in input order.
    pub async fn embed_passages(&self, texts: &[String]) -> Result<Vec<PointVectors>, EmbeddingError> {
        let dense = self
            .dense
            .embed_passages(texts)
            .await
            .map_err(|e| EmbeddingError::from_anyhow(self.dense.model_name(), &e))?;
        check_len(self.dense.model_name(), dense.len(), texts.len())?;

        let sparse = self
            .sparse
            .embed_passages(texts)
            .await
            .map_err(|e| EmbeddingError::from_anyhow(self.sparse.model_name(), &e))?;
        check_len(self.sparse.model_name(), sparse.len(), texts.len())?;

        let late = self
            .late_interaction
            .embed_passages(texts)
            .await
            .map_err(|e| EmbeddingError::from_anyhow(self.late_interaction.model_name(), &e))?;
        check_len(self.late_interaction.model_name(), late.len(), texts.len())?;

        Ok(dense
            .into_iter()
            .zip(sparse)
            .zip(late)
            .map(|((dense, sparse), late_interaction)| PointVectors {
                dense,
                sparse,
                late_interaction,
            })
            .collect())
    }

    /// Embed a query with all three models concurrently.
    pub async fn embed_query(&self, text: &str) -> Result<PointVectors, EmbeddingError> {
        let dense = async {
            self.dense
                .embed_query(text)
                .await
                .map_err(|e| EmbeddingError::from_anyhow(self.dense.model_name(), &e))
        };
        let sparse = async {
            self.sparse
                .embed_query(text)
                .await
                .map_err(|e| EmbeddingError::from_anyhow(self.sparse.model_name(), &e))
        };
        let late_interaction = async {
            self.late_interaction
                .embed_query(text)
                .await
                .map_err(|e| EmbeddingError::from_anyhow(self.late_interaction.model_name(), &e))
        };

        let (dense, sparse, late_interaction) =
            futures::try_join!(dense, sparse, late_interaction)?;

        Ok(PointVectors {
            dense,
            sparse,
            late_interaction,
        })
    }
}

fn check_len(model: &str, got: usize, expected: usize) -> Result<(), EmbeddingError> {
    if got != expected {
        return Err(EmbeddingError::new(
            model,
            format!("returned {got} vectors for {expected} texts"),
        ));
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use hybrid_rag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Scale a vector to unit length in place. Zero vectors are left unchanged.
pub fn normalize_l2(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
