//! Core data models: chunks, point vectors, payloads and collection schema.
//!
//! An [`EmbeddedPoint`] is the unit of storage. It always carries all three
//! vector representations (dense, sparse, late-interaction) so the type
//! system rules out partially populated points; [`EmbeddedPoint::validate`]
//! checks the remaining shape constraints against a [`VectorSpaces`]
//! declaration before anything is written.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::PointError;

/// Non-vector data attached to a stored point.
pub type Payload = Map<String, Value>;

/// Payload key holding the original chunk text.
pub const TEXT_FIELD: &str = "text";

/// A text chunk produced by an upstream chunker.
///
/// `id` is only unique within one batch; it is kept as metadata and never
/// used as the stored point id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build the stored payload: metadata entries, the chunk id under
    /// `chunk_id`, and the chunk text under [`TEXT_FIELD`].
    pub fn to_payload(&self) -> Payload {
        let mut payload: Payload = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        payload.insert("chunk_id".to_string(), Value::String(self.id.clone()));
        payload.insert(TEXT_FIELD.to_string(), Value::String(self.text.clone()));
        payload
    }
}

/// Weighted bag-of-terms vector, kept sorted by term index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Create a sparse vector, sorting the entries by index.
    ///
    /// Mismatched lengths are kept as-is and reported by validation.
    pub fn new(indices: Vec<u32>, values: Vec<f32>) -> Self {
        if indices.len() != values.len() {
            return Self { indices, values };
        }
        let mut pairs: Vec<(u32, f32)> = indices.into_iter().zip(values).collect();
        pairs.sort_by_key(|(i, _)| *i);
        let (indices, values) = pairs.into_iter().unzip();
        Self { indices, values }
    }

    /// Build from `(index, weight)` pairs, summing weights of repeated indices.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, f32)>) -> Self {
        let mut merged: BTreeMap<u32, f32> = BTreeMap::new();
        for (i, w) in pairs {
            *merged.entry(i).or_insert(0.0) += w;
        }
        let (indices, values) = merged.into_iter().unzip();
        Self { indices, values }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }
}

/// A sequence of fixed-width token vectors (one per input token).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiVector(pub Vec<Vec<f32>>);

impl MultiVector {
    pub fn new(vectors: Vec<Vec<f32>>) -> Self {
        Self(vectors)
    }

    /// Number of token vectors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Width of the first token vector, if any.
    pub fn dim(&self) -> Option<usize> {
        self.0.first().map(Vec::len)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.0.iter().map(Vec::as_slice)
    }

    /// Concatenate all token vectors into one flat buffer.
    pub fn to_flat(&self) -> Vec<f32> {
        self.0.iter().flatten().copied().collect()
    }

    /// Rebuild from a flat buffer of `dim`-wide rows.
    pub fn from_flat(flat: &[f32], dim: usize) -> Option<Self> {
        if dim == 0 || flat.len() % dim != 0 {
            return None;
        }
        Some(Self(flat.chunks_exact(dim).map(<[f32]>::to_vec).collect()))
    }
}

/// The three vector representations of one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointVectors {
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub late_interaction: MultiVector,
}

/// The unit of storage: fresh id, all three vectors, payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedPoint {
    pub id: String,
    pub vectors: PointVectors,
    pub payload: Payload,
}

impl EmbeddedPoint {
    /// Create a point for `chunk` with a newly generated UUIDv4 id.
    pub fn from_chunk(chunk: &Chunk, vectors: PointVectors) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            vectors,
            payload: chunk.to_payload(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.get(TEXT_FIELD).and_then(Value::as_str)
    }

    /// Check that every vector space is populated and shaped as declared.
    pub fn validate(&self, spaces: &VectorSpaces) -> Result<(), PointError> {
        if self.text().is_none() {
            return Err(PointError::MissingText);
        }

        let dense = &self.vectors.dense;
        let name = &spaces.dense.name;
        if dense.is_empty() {
            return Err(PointError::EmptyVector(name.clone()));
        }
        if dense.len() != spaces.dense.size {
            return Err(PointError::DimensionMismatch {
                space: name.clone(),
                expected: spaces.dense.size,
                found: dense.len(),
            });
        }
        if dense.iter().any(|v| !v.is_finite()) {
            return Err(PointError::NonFinite(name.clone()));
        }

        let sparse = &self.vectors.sparse;
        let name = &spaces.sparse.name;
        if sparse.indices.len() != sparse.values.len() {
            return Err(PointError::SparseShape {
                space: name.clone(),
                indices: sparse.indices.len(),
                values: sparse.values.len(),
            });
        }
        if sparse.is_empty() {
            return Err(PointError::EmptyVector(name.clone()));
        }
        if let Some(w) = sparse.indices.windows(2).find(|w| w[0] >= w[1]) {
            return Err(PointError::UnsortedSparse {
                space: name.clone(),
                index: w[1],
            });
        }
        if sparse.values.iter().any(|v| !v.is_finite()) {
            return Err(PointError::NonFinite(name.clone()));
        }

        let multi = &self.vectors.late_interaction;
        let name = &spaces.late_interaction.name;
        if multi.is_empty() {
            return Err(PointError::EmptyVector(name.clone()));
        }
        for token in multi.iter() {
            if token.len() != spaces.late_interaction.size {
                return Err(PointError::DimensionMismatch {
                    space: name.clone(),
                    expected: spaces.late_interaction.size,
                    found: token.len(),
                });
            }
            if token.iter().any(|v| !v.is_finite()) {
                return Err(PointError::NonFinite(name.clone()));
            }
        }

        Ok(())
    }
}

/// Similarity function of a dense or multivector space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    Cosine,
    Dot,
}

/// Collection-level weighting applied to sparse scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SparseModifier {
    None,
    Idf,
}

/// How two token sequences are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiVectorComparator {
    MaxSim,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseSpace {
    pub name: String,
    pub size: usize,
    pub distance: Distance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseSpace {
    pub name: String,
    pub modifier: SparseModifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiVectorSpace {
    pub name: String,
    pub size: usize,
    pub distance: Distance,
    pub comparator: MultiVectorComparator,
}

/// Names of the three vector spaces of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceNames {
    pub dense: String,
    pub sparse: String,
    pub late_interaction: String,
}

impl Default for SpaceNames {
    fn default() -> Self {
        Self {
            dense: "dense".to_string(),
            sparse: "sparse".to_string(),
            late_interaction: "late_interaction".to_string(),
        }
    }
}

/// The three named vector spaces every collection declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorSpaces {
    pub dense: DenseSpace,
    pub sparse: SparseSpace,
    pub late_interaction: MultiVectorSpace,
}

/// A borrowed view of one resolved space.
#[derive(Debug, Clone, Copy)]
pub enum SpaceRef<'a> {
    Dense(&'a DenseSpace),
    Sparse(&'a SparseSpace),
    Multi(&'a MultiVectorSpace),
}

impl VectorSpaces {
    /// Cosine dense space, IDF-weighted sparse space and a MaxSim
    /// late-interaction space over cosine similarity.
    pub fn new(names: &SpaceNames, dense_dims: usize, late_interaction_dims: usize) -> Self {
        Self {
            dense: DenseSpace {
                name: names.dense.clone(),
                size: dense_dims,
                distance: Distance::Cosine,
            },
            sparse: SparseSpace {
                name: names.sparse.clone(),
                modifier: SparseModifier::Idf,
            },
            late_interaction: MultiVectorSpace {
                name: names.late_interaction.clone(),
                size: late_interaction_dims,
                distance: Distance::Cosine,
                comparator: MultiVectorComparator::MaxSim,
            },
        }
    }

    pub fn names(&self) -> SpaceNames {
        SpaceNames {
            dense: self.dense.name.clone(),
            sparse: self.sparse.name.clone(),
            late_interaction: self.late_interaction.name.clone(),
        }
    }

    /// Look up a space by name.
    pub fn resolve(&self, name: &str) -> Option<SpaceRef<'_>> {
        if name == self.dense.name {
            Some(SpaceRef::Dense(&self.dense))
        } else if name == self.sparse.name {
            Some(SpaceRef::Sparse(&self.sparse))
        } else if name == self.late_interaction.name {
            Some(SpaceRef::Multi(&self.late_interaction))
        } else {
            None
        }
    }
}

/// The model identities a collection was indexed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub dense: String,
    pub sparse: String,
    pub late_interaction: String,
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dense={}, sparse={}, late_interaction={}",
            self.dense, self.sparse, self.late_interaction
        )
    }
}

/// Immutable schema declared when a collection is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub spaces: VectorSpaces,
    /// Pinned embedding models; `None` for collections created without one.
    #[serde(default)]
    pub models: Option<ModelIdentity>,
}
