//! Similarity functions for the three vector spaces.
//!
//! Dense vectors compare by cosine or dot product, sparse vectors by a
//! merge-join dot product over sorted indices (optionally IDF-weighted), and
//! multivectors by MaxSim: for each query token take the best-matching
//! document token and sum those maxima.

use crate::models::{Distance, MultiVector, SparseVector};

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths or
/// zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Plain dot product; `0.0` for mismatched lengths.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn similarity(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => cosine_similarity(a, b),
        Distance::Dot => dot_product(a, b),
    }
}

/// Dot product of two sparse vectors with sorted indices, with each shared
/// term scaled by `weight(index)`.
///
/// `None` when the vectors share no index. A shared term with a zero weight
/// still counts as a match.
pub fn sparse_match(
    query: &SparseVector,
    doc: &SparseVector,
    weight: impl Fn(u32) -> f32,
) -> Option<f32> {
    let (qi, qv) = (&query.indices, &query.values);
    let (di, dv) = (&doc.indices, &doc.values);
    let mut i = 0;
    let mut j = 0;
    let mut sum = 0.0f32;
    let mut matched = false;

    while i < qi.len() && j < di.len() {
        match qi[i].cmp(&di[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += qv[i] * weight(qi[i]) * dv[j];
                matched = true;
                i += 1;
                j += 1;
            }
        }
    }

    matched.then_some(sum)
}

/// Like [`sparse_match`], but `0.0` when nothing is shared.
pub fn sparse_dot_weighted(
    query: &SparseVector,
    doc: &SparseVector,
    weight: impl Fn(u32) -> f32,
) -> f32 {
    sparse_match(query, doc, weight).unwrap_or(0.0)
}

/// Unweighted sparse dot product.
pub fn sparse_dot(query: &SparseVector, doc: &SparseVector) -> f32 {
    sparse_dot_weighted(query, doc, |_| 1.0)
}

/// Inverse document frequency with BM25 smoothing:
/// `ln((N - n + 0.5) / (n + 0.5) + 1)`.
///
/// Always positive, so a term present in every document still contributes.
pub fn idf(total_docs: usize, doc_freq: usize) -> f32 {
    let n = total_docs as f32;
    let df = doc_freq.min(total_docs) as f32;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// MaxSim late-interaction score.
///
/// Sum over query tokens of the maximum similarity to any document token.
/// An empty document scores `0.0`.
pub fn maxsim(query: &MultiVector, doc: &MultiVector, distance: Distance) -> f32 {
    if doc.is_empty() {
        return 0.0;
    }
    query
        .iter()
        .map(|q| {
            doc.iter()
                .map(|d| similarity(distance, q, d))
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_sparse_dot_shared_terms_only() {
        let q = SparseVector::new(vec![1, 3, 5], vec![1.0, 1.0, 1.0]);
        let d = SparseVector::new(vec![3, 4, 5], vec![2.0, 9.0, 0.5]);
        assert!((sparse_dot(&q, &d) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_sparse_dot_disjoint_is_zero() {
        let q = SparseVector::new(vec![1], vec![1.0]);
        let d = SparseVector::new(vec![2], vec![1.0]);
        assert_eq!(sparse_dot(&q, &d), 0.0);
        assert_eq!(sparse_match(&q, &d, |_| 1.0), None);
    }

    #[test]
    fn test_sparse_match_counts_zero_valued_overlap() {
        let q = SparseVector::new(vec![4], vec![1.0]);
        let d = SparseVector::new(vec![4], vec![0.0]);
        assert_eq!(sparse_match(&q, &d, |_| 1.0), Some(0.0));
    }

    #[test]
    fn test_idf_rare_terms_weigh_more() {
        assert!(idf(100, 1) > idf(100, 50));
        assert!(idf(100, 100) > 0.0);
    }

    #[test]
    fn test_idf_single_doc_value() {
        // ln((1 - 1 + 0.5) / 1.5 + 1) = ln(4/3)
        assert!((idf(1, 1) - (4.0f32 / 3.0).ln()).abs() < 1e-6);
    }

    #[test]
    fn test_maxsim_sums_best_matches() {
        let q = MultiVector::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let d = MultiVector::new(vec![vec![1.0, 0.0], vec![0.6, 0.8]]);
        // q0 best = 1.0 (d0), q1 best = 0.8 (d1)
        assert!((maxsim(&q, &d, Distance::Cosine) - 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_maxsim_empty_doc() {
        let q = MultiVector::new(vec![vec![1.0, 0.0]]);
        assert_eq!(maxsim(&q, &MultiVector::default(), Distance::Dot), 0.0);
    }

    #[test]
    fn test_maxsim_not_symmetric() {
        let a = MultiVector::new(vec![vec![1.0, 0.0]]);
        let b = MultiVector::new(vec![vec![1.0, 0.0], vec![1.0, 0.0]]);
        assert!((maxsim(&a, &b, Distance::Dot) - 1.0).abs() < 1e-6);
        assert!((maxsim(&b, &a, Distance::Dot) - 2.0).abs() < 1e-6);
    }
}
