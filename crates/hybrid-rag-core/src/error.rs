//! Error types for point validation and retrieval.

use thiserror::Error;

use crate::models::ModelIdentity;

/// A point that does not match its collection's declared vector spaces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PointError {
    #[error("point payload has no text field")]
    MissingText,
    #[error("vector space '{0}' is empty")]
    EmptyVector(String),
    #[error("vector space '{space}' expects {expected} dimensions, got {found}")]
    DimensionMismatch {
        space: String,
        expected: usize,
        found: usize,
    },
    #[error("sparse vector '{space}' has {indices} indices but {values} values")]
    SparseShape {
        space: String,
        indices: usize,
        values: usize,
    },
    #[error("sparse vector '{space}' has unsorted or repeated index {index}")]
    UnsortedSparse { space: String, index: u32 },
    #[error("vector space '{0}' contains a non-finite value")]
    NonFinite(String),
}

/// An embedding model failed on a text.
#[derive(Debug, Clone, Error)]
#[error("embedding model '{model}' failed: {message}")]
pub struct EmbeddingError {
    pub model: String,
    pub message: String,
}

impl EmbeddingError {
    pub fn new(model: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self {
            model: model.into(),
            message: err.to_string(),
        }
    }

    pub fn from_anyhow(model: impl Into<String>, err: &anyhow::Error) -> Self {
        Self {
            model: model.into(),
            message: format!("{err:#}"),
        }
    }
}

/// Failures surfaced to callers of the retriever.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("collection '{collection}' not found")]
    CollectionNotFound { collection: String },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("storage error on collection '{collection}': {message}")]
    Storage { collection: String, message: String },

    #[error("collection '{collection}' was indexed with [{expected}] but the embedder is [{found}]")]
    ModelMismatch {
        collection: String,
        expected: ModelIdentity,
        found: ModelIdentity,
    },
}

impl RetrievalError {
    pub fn storage(collection: &str, err: &anyhow::Error) -> Self {
        Self::Storage {
            collection: collection.to_string(),
            message: format!("{err:#}"),
        }
    }
}
