use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::Entry;

/// Added to every norm so zero vectors normalise to zero instead of NaN.
pub const NORM_EPSILON: f32 = 1e-8;

/// A scored cache entry. Serializes as the entry's fields plus `score`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub score: f32,
    #[serde(flatten)]
    pub entry: Entry,
}

/// Dot product, unrolled 8 lanes so LLVM can vectorize it.
#[inline(always)]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0;

    let chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let remainder_start = a.len() - a.len() % 8;

    for (ac, bc) in chunks.zip(b_chunks) {
        sum += ac[0]*bc[0] + ac[1]*bc[1] + ac[2]*bc[2] + ac[3]*bc[3] +
        ac[4]*bc[4] + ac[5]*bc[5] + ac[6]*bc[6] + ac[7]*bc[7];
    }

    for i in remainder_start..a.len() {
        sum += a[i] * b[i];
    }

    sum
}

/// Scale to unit length (norm + epsilon).
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = dot(v, v).sqrt() + NORM_EPSILON;
    v.iter().map(|x| x / norm).collect()
}

/// Brute-force cosine ranking.
///
/// `candidates` order is the tie-break: equal scores keep their relative
/// position. Entries without a vector, or whose dimension differs from the
/// query, produce no score.
pub fn rank<'a>(query: &[f32], candidates: impl Iterator<Item = &'a Entry>, top_k: usize) -> Vec<SearchHit> {
    if top_k == 0 {
        return Vec::new();
    }
    let query = normalize(query);

    let mut hits: Vec<SearchHit> = candidates
        .filter_map(|entry| {
            let vector = entry.vector.as_deref()?;
            if vector.len() != query.len() {
                debug!(id = %entry.id, dim = vector.len(), query_dim = query.len(), "skipping vector with mismatched dimension");
                return None;
            }
            let score = dot(&query, &normalize(vector));
            Some(SearchHit { score, entry: entry.clone() })
        })
        .collect();

    // Stable: ties stay in candidate order
    hits.sort_by_key(|hit| Reverse(OrderedFloat(hit.score)));
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metadata;

    fn entry(id: &str, vector: Option<Vec<f32>>) -> Entry {
        Entry::new(id, vector, None, None, Metadata::new())
    }

    #[test]
    fn orthogonal_and_parallel_vectors_score_zero_and_one() {
        let entries = vec![entry("e2", Some(vec![0.0, 1.0, 0.0])), entry("e1", Some(vec![1.0, 0.0, 0.0]))];
        let hits = rank(&[1.0, 0.0, 0.0], entries.iter(), 2);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.id, "e1");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert_eq!(hits[1].entry.id, "e2");
        assert!(hits[1].score.abs() < 1e-5);
    }

    #[test]
    fn magnitude_does_not_affect_score() {
        let entries = vec![entry("big", Some(vec![10.0, 10.0])), entry("small", Some(vec![0.1, 0.1]))];
        let hits = rank(&[1.0, 1.0], entries.iter(), 5);
        assert!((hits[0].score - hits[1].score).abs() < 1e-5);
    }

    #[test]
    fn entries_without_vectors_are_skipped() {
        let entries = vec![entry("text-only", None), entry("v", Some(vec![1.0, 0.0]))];
        let hits = rank(&[1.0, 0.0], entries.iter(), 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, "v");
    }

    #[test]
    fn ties_keep_candidate_order() {
        let entries = vec![
            entry("first", Some(vec![1.0, 0.0])),
            entry("second", Some(vec![2.0, 0.0])),
            entry("third", Some(vec![3.0, 0.0])),
        ];
        let ids: Vec<String> = rank(&[1.0, 0.0], entries.iter(), 3).into_iter().map(|h| h.entry.id).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn top_k_truncates_and_zero_is_empty() {
        let entries: Vec<Entry> = (0..5).map(|i| entry(&format!("e{}", i), Some(vec![1.0, i as f32]))).collect();
        assert_eq!(rank(&[1.0, 0.0], entries.iter(), 2).len(), 2);
        assert!(rank(&[1.0, 0.0], entries.iter(), 0).is_empty());
        assert!(rank(&[1.0, 0.0], std::iter::empty(), 3).is_empty());
    }

    #[test]
    fn zero_query_scores_zero_without_nan() {
        let entries = vec![entry("a", Some(vec![1.0, 0.0]))];
        let hits = rank(&[0.0, 0.0], entries.iter(), 1);
        assert_eq!(hits[0].score, 0.0);
    }

    #[test]
    fn unrolled_dot_matches_naive_sum() {
        let a: Vec<f32> = (0..19).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..19).map(|i| 1.0 - i as f32 * 0.1).collect();
        let naive: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((dot(&a, &b) - naive).abs() < 1e-3);
    }

    #[test]
    fn hit_serializes_flat() {
        let hit = SearchHit { score: 0.5, entry: entry("a", Some(vec![1.0])) };
        let value = serde_json::to_value(&hit).unwrap();
        assert_eq!(value["id"], "a");
        assert_eq!(value["score"], 0.5);
    }
}
