//! Local evaluation of two-stage [`SearchRequest`]s.
//!
//! Shared by the in-memory store and the SQLite store: both load a
//! collection's points in storage order and hand them here. Scoring is
//! brute force over the candidate set.
//!
//! Ordering rules:
//! - each prefetch ranks all points by its own space and keeps `limit`;
//! - a sparse space only yields points sharing at least one term with the
//!   query;
//! - candidates are the union of prefetch results in first-seen order;
//! - the final stage sorts candidates by descending score with a stable
//!   sort, so ties keep union (or storage) order.

use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};

use crate::models::{CollectionSchema, EmbeddedPoint, SparseModifier, SpaceRef, VectorSpaces};
use crate::similarity::{idf, maxsim, similarity, sparse_match};
use crate::store::{QueryVector, ScoredPoint, SearchRequest};

/// Run `request` against `points` (in storage order).
pub fn evaluate(
    points: &[EmbeddedPoint],
    schema: &CollectionSchema,
    request: &SearchRequest,
) -> Result<Vec<ScoredPoint>> {
    let scorer = Scorer::new(points, &schema.spaces);

    let candidates: Vec<usize> = if request.prefetch.is_empty() {
        (0..points.len()).collect()
    } else {
        let all: Vec<usize> = (0..points.len()).collect();
        let mut seen = HashSet::new();
        let mut union = Vec::new();
        for prefetch in &request.prefetch {
            let ranked = scorer.rank(&all, &prefetch.query, &prefetch.using, prefetch.limit)?;
            for (idx, _) in ranked {
                if seen.insert(idx) {
                    union.push(idx);
                }
            }
        }
        union
    };

    let ranked = scorer.rank(&candidates, &request.query, &request.using, request.limit)?;

    Ok(ranked
        .into_iter()
        .map(|(idx, score)| ScoredPoint {
            id: points[idx].id.clone(),
            score,
            payload: points[idx].payload.clone(),
        })
        .collect())
}

/// Stable descending sort by score, then truncate.
pub fn top_k(mut scored: Vec<(usize, f32)>, limit: usize) -> Vec<(usize, f32)> {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

struct Scorer<'a> {
    points: &'a [EmbeddedPoint],
    spaces: &'a VectorSpaces,
    doc_freq: OnceCell<HashMap<u32, usize>>,
}

impl<'a> Scorer<'a> {
    fn new(points: &'a [EmbeddedPoint], spaces: &'a VectorSpaces) -> Self {
        Self {
            points,
            spaces,
            doc_freq: OnceCell::new(),
        }
    }

    fn doc_freq(&self) -> &HashMap<u32, usize> {
        self.doc_freq.get_or_init(|| {
            let mut df = HashMap::new();
            for p in self.points {
                for &i in &p.vectors.sparse.indices {
                    *df.entry(i).or_insert(0) += 1;
                }
            }
            df
        })
    }

    fn rank(
        &self,
        candidates: &[usize],
        query: &QueryVector,
        using: &str,
        limit: usize,
    ) -> Result<Vec<(usize, f32)>> {
        let Some(space) = self.spaces.resolve(using) else {
            bail!("unknown vector space '{using}'");
        };

        let scored = match (space, query) {
            (SpaceRef::Dense(space), QueryVector::Dense(q)) => {
                if q.len() != space.size {
                    bail!(
                        "query for space '{}' has {} dimensions, expected {}",
                        space.name,
                        q.len(),
                        space.size
                    );
                }
                candidates
                    .iter()
                    .map(|&i| (i, similarity(space.distance, q, &self.points[i].vectors.dense)))
                    .collect()
            }
            (SpaceRef::Sparse(space), QueryVector::Sparse(q)) => {
                let total = self.points.len();
                candidates
                    .iter()
                    .filter_map(|&i| {
                        let doc = &self.points[i].vectors.sparse;
                        let score = match space.modifier {
                            SparseModifier::None => sparse_match(q, doc, |_| 1.0),
                            SparseModifier::Idf => {
                                let df = self.doc_freq();
                                sparse_match(q, doc, |t| {
                                    idf(total, df.get(&t).copied().unwrap_or(0))
                                })
                            }
                        }?;
                        Some((i, score))
                    })
                    .collect()
            }
            (SpaceRef::Multi(space), QueryVector::Multi(q)) => {
                if let Some(bad) = q.iter().find(|t| t.len() != space.size) {
                    bail!(
                        "query token for space '{}' has {} dimensions, expected {}",
                        space.name,
                        bad.len(),
                        space.size
                    );
                }
                candidates
                    .iter()
                    .map(|&i| {
                        (
                            i,
                            maxsim(q, &self.points[i].vectors.late_interaction, space.distance),
                        )
                    })
                    .collect()
            }
            _ => bail!("query vector kind does not match vector space '{using}'"),
        };

        Ok(top_k(scored, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, MultiVector, PointVectors, SpaceNames, SparseVector};
    use crate::store::Prefetch;

    fn schema() -> CollectionSchema {
        CollectionSchema {
            spaces: VectorSpaces::new(&SpaceNames::default(), 2, 2),
            models: None,
        }
    }

    fn point(text: &str, dense: [f32; 2], terms: &[u32], tokens: &[[f32; 2]]) -> EmbeddedPoint {
        EmbeddedPoint::from_chunk(
            &Chunk::new(text, text),
            PointVectors {
                dense: dense.to_vec(),
                sparse: SparseVector::new(terms.to_vec(), vec![1.0; terms.len()]),
                late_interaction: MultiVector::new(tokens.iter().map(|t| t.to_vec()).collect()),
            },
        )
    }

    fn texts(results: &[ScoredPoint]) -> Vec<&str> {
        results
            .iter()
            .map(|r| r.payload["text"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_top_k_stable_on_ties() {
        let out = top_k(vec![(0, 1.0), (1, 2.0), (2, 1.0), (3, 2.0)], 3);
        assert_eq!(out, vec![(1, 2.0), (3, 2.0), (0, 1.0)]);
    }

    #[test]
    fn test_rescore_only_prefetched_candidates() {
        // "c" has the best late-interaction score but is found by neither prefetch.
        let points = vec![
            point("a", [1.0, 0.0], &[1], &[[0.0, 1.0]]),
            point("b", [0.0, 1.0], &[2], &[[0.6, 0.8]]),
            point("c", [-1.0, 0.0], &[3], &[[1.0, 0.0]]),
        ];
        let request = SearchRequest {
            query: QueryVector::Multi(MultiVector::new(vec![vec![1.0, 0.0]])),
            using: "late_interaction".into(),
            prefetch: vec![
                Prefetch {
                    query: QueryVector::Dense(vec![1.0, 0.0]),
                    using: "dense".into(),
                    limit: 1,
                },
                Prefetch {
                    query: QueryVector::Sparse(SparseVector::new(vec![2], vec![1.0])),
                    using: "sparse".into(),
                    limit: 1,
                },
            ],
            limit: 10,
        };
        let out = evaluate(&points, &schema(), &request).unwrap();
        assert_eq!(texts(&out), vec!["b", "a"]);
    }

    #[test]
    fn test_union_dedups_in_first_seen_order() {
        // Identical late-interaction vectors: final order is the union order.
        let points = vec![
            point("a", [0.0, 1.0], &[1], &[[1.0, 0.0]]),
            point("b", [1.0, 0.0], &[1], &[[1.0, 0.0]]),
            point("c", [0.5, 0.5], &[2], &[[1.0, 0.0]]),
        ];
        let request = SearchRequest {
            query: QueryVector::Multi(MultiVector::new(vec![vec![1.0, 0.0]])),
            using: "late_interaction".into(),
            prefetch: vec![
                Prefetch {
                    query: QueryVector::Dense(vec![1.0, 0.0]),
                    using: "dense".into(),
                    limit: 2,
                },
                Prefetch {
                    query: QueryVector::Sparse(SparseVector::new(vec![1, 2], vec![1.0, 1.0])),
                    using: "sparse".into(),
                    limit: 3,
                },
            ],
            limit: 10,
        };
        let out = evaluate(&points, &schema(), &request).unwrap();
        // dense prefetch: b, c; sparse adds a
        assert_eq!(texts(&out), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_sparse_prefetch_skips_points_without_shared_terms() {
        // "x" wins MaxSim but shares no term with the query and is last on dense.
        let points = vec![
            point("x", [-1.0, 0.0], &[99], &[[1.0, 0.0]]),
            point("a", [1.0, 0.0], &[1], &[[0.0, 1.0]]),
            point("b", [0.0, 1.0], &[2], &[[0.6, 0.8]]),
        ];
        let sparse_only = SearchRequest {
            query: QueryVector::Sparse(SparseVector::new(vec![2], vec![1.0])),
            using: "sparse".into(),
            prefetch: vec![],
            limit: 2,
        };
        let out = evaluate(&points, &schema(), &sparse_only).unwrap();
        assert_eq!(texts(&out), vec!["b"]);

        let request = SearchRequest {
            query: QueryVector::Multi(MultiVector::new(vec![vec![1.0, 0.0]])),
            using: "late_interaction".into(),
            prefetch: vec![
                Prefetch {
                    query: QueryVector::Dense(vec![1.0, 0.0]),
                    using: "dense".into(),
                    limit: 1,
                },
                Prefetch {
                    query: QueryVector::Sparse(SparseVector::new(vec![2], vec![1.0])),
                    using: "sparse".into(),
                    limit: 2,
                },
            ],
            limit: 10,
        };
        let out = evaluate(&points, &schema(), &request).unwrap();
        assert_eq!(texts(&out), vec!["b", "a"]);
    }

    #[test]
    fn test_empty_sparse_query_matches_nothing() {
        let points = vec![point("a", [1.0, 0.0], &[1], &[[1.0, 0.0]])];
        let request = SearchRequest {
            query: QueryVector::Sparse(SparseVector::default()),
            using: "sparse".into(),
            prefetch: vec![],
            limit: 5,
        };
        assert!(evaluate(&points, &schema(), &request).unwrap().is_empty());
    }

    #[test]
    fn test_idf_prefers_rare_terms() {
        let points = vec![
            point("common", [1.0, 0.0], &[1], &[[1.0, 0.0]]),
            point("rare", [1.0, 0.0], &[2], &[[1.0, 0.0]]),
            point("other", [1.0, 0.0], &[1], &[[1.0, 0.0]]),
        ];
        let request = SearchRequest {
            query: QueryVector::Sparse(SparseVector::new(vec![1, 2], vec![1.0, 1.0])),
            using: "sparse".into(),
            prefetch: vec![],
            limit: 1,
        };
        let out = evaluate(&points, &schema(), &request).unwrap();
        assert_eq!(texts(&out), vec!["rare"]);
    }

    #[test]
    fn test_zero_limit_and_empty_collection() {
        let request = SearchRequest {
            query: QueryVector::Dense(vec![1.0, 0.0]),
            using: "dense".into(),
            prefetch: vec![],
            limit: 0,
        };
        let points = vec![point("a", [1.0, 0.0], &[1], &[[1.0, 0.0]])];
        assert!(evaluate(&points, &schema(), &request).unwrap().is_empty());
        assert!(evaluate(&[], &schema(), &request).unwrap().is_empty());
    }

    #[test]
    fn test_kind_and_space_errors() {
        let points = vec![point("a", [1.0, 0.0], &[1], &[[1.0, 0.0]])];
        let wrong_kind = SearchRequest {
            query: QueryVector::Dense(vec![1.0, 0.0]),
            using: "sparse".into(),
            prefetch: vec![],
            limit: 1,
        };
        assert!(evaluate(&points, &schema(), &wrong_kind).is_err());

        let unknown = SearchRequest {
            using: "nope".into(),
            ..wrong_kind.clone()
        };
        assert!(evaluate(&points, &schema(), &unknown).is_err());

        let bad_dims = SearchRequest {
            query: QueryVector::Dense(vec![1.0, 0.0, 0.0]),
            using: "dense".into(),
            ..wrong_kind
        };
        assert!(evaluate(&points, &schema(), &bad_dims).is_err());
    }
}
