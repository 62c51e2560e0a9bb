//! Top-k selection and the exact linear-scan backend.
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use super::SimilarityMetric;
use crate::models::Chunk;

/// One stored `(vector, chunk)` pair. `norm` is cached for cosine scoring.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub vector: Vec<f32>,
    pub norm: f32,
    pub chunk: Chunk,
}

pub(crate) struct Query<'a> {
    pub vector: &'a [f32],
    pub norm: f32,
    pub k: usize,
}

/// A scored entry position. Orders by score, then by earlier insertion.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub position: usize,
    pub score: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.position.cmp(&self.position))
    }
}

/// Keep the `k` best of `positions` in a bounded min-heap; best first.
pub(crate) fn top_k<I, F>(positions: I, k: usize, score: F) -> Vec<Candidate>
where
    I: IntoIterator<Item = usize>,
    F: Fn(usize) -> f32,
{
    if k == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(k + 1);
    for position in positions {
        let candidate = Candidate {
            position,
            score: score(position),
        };
        if heap.len() < k {
            heap.push(Reverse(candidate));
        } else if let Some(Reverse(worst)) = heap.peek() {
            if candidate > *worst {
                heap.pop();
                heap.push(Reverse(candidate));
            }
        }
    }

    let mut best: Vec<Candidate> = heap.into_iter().map(|Reverse(c)| c).collect();
    best.sort_unstable_by(|a, b| b.cmp(a));
    best
}

/// A search strategy over the entries of one index.
///
/// Implementations must return at most `query.k` candidates, best first,
/// breaking ties by insertion order.
pub(crate) trait NearestNeighbors: Send + Sync {
    fn name(&self) -> &'static str;

    fn nearest(
        &self,
        entries: &[Entry],
        metric: SimilarityMetric,
        query: &Query<'_>,
    ) -> Vec<Candidate>;
}

/// Exact O(n·dim) scan.
pub(crate) struct FlatScan;

impl NearestNeighbors for FlatScan {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn nearest(
        &self,
        entries: &[Entry],
        metric: SimilarityMetric,
        query: &Query<'_>,
    ) -> Vec<Candidate> {
        top_k(0..entries.len(), query.k, |i| {
            let e = &entries[i];
            metric.score(query.vector, query.norm, &e.vector, e.norm)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_orders_descending() {
        let scores = [0.1, 0.9, 0.5, 0.7];
        let best = top_k(0..scores.len(), 3, |i| scores[i]);
        let positions: Vec<usize> = best.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![1, 3, 2]);
    }

    #[test]
    fn test_top_k_ties_prefer_earlier() {
        let scores = [0.5, 0.8, 0.5, 0.8, 0.5];
        let best = top_k(0..scores.len(), 4, |i| scores[i]);
        let positions: Vec<usize> = best.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_top_k_larger_than_input() {
        let scores = [0.3, 0.2];
        assert_eq!(top_k(0..2, 10, |i| scores[i]).len(), 2);
        assert!(top_k(0..2, 0, |i| scores[i]).is_empty());
    }
}
