//! Inverted-file partitioning for large corpora.
//!
//! Vectors are grouped around `nlist` centroids found by a few rounds of
//! k-means. A query is scored against the centroids, the best `nprobe`
//! partitions are opened, and the exact scan runs only over their members.
//! Results keep the exact scan's ordering contract but may miss true
//! neighbours living in unprobed partitions.
use tracing::debug;

use super::SimilarityMetric;
use super::metric::magnitude;
use super::search::{Candidate, Entry, NearestNeighbors, Query, top_k};

const KMEANS_ITERATIONS: usize = 8;
const TRAIN_SAMPLES_PER_LIST: usize = 32;
const MAX_LISTS: usize = 1024;

pub(crate) struct IvfIndex {
    centroids: Vec<Vec<f32>>,
    centroid_norms: Vec<f32>,
    lists: Vec<Vec<usize>>,
    nprobe: usize,
    /// Entry count when the centroids were trained.
    trained_on: usize,
}

impl IvfIndex {
    /// Train centroids over `entries` and assign every entry to a partition.
    ///
    /// `nprobe == 0` picks `max(4, nlist / 8)`.
    pub fn train(entries: &[Entry], metric: SimilarityMetric, nprobe: usize) -> Self {
        let n = entries.len();
        let nlist = ((n as f64).sqrt() as usize).clamp(1, MAX_LISTS).min(n.max(1));
        let nprobe = if nprobe == 0 {
            (nlist / 8).max(4)
        } else {
            nprobe
        }
        .min(nlist);

        // Evenly strided sample keeps training deterministic.
        let sample_size = (nlist * TRAIN_SAMPLES_PER_LIST).min(n);
        let sample: Vec<usize> = (0..sample_size).map(|i| i * n / sample_size.max(1)).collect();

        let mut centroids: Vec<Vec<f32>> = (0..nlist)
            .map(|i| entries[sample[i * sample.len() / nlist]].vector.clone())
            .collect();
        let mut centroid_norms: Vec<f32> = centroids.iter().map(|c| magnitude(c)).collect();

        let dim = entries.first().map_or(0, |e| e.vector.len());
        for _ in 0..KMEANS_ITERATIONS {
            let mut sums = vec![vec![0.0f32; dim]; nlist];
            let mut counts = vec![0usize; nlist];
            for &pos in &sample {
                let e = &entries[pos];
                let c = nearest_centroid(&centroids, &centroid_norms, metric, &e.vector, e.norm);
                counts[c] += 1;
                for (s, v) in sums[c].iter_mut().zip(&e.vector) {
                    *s += v;
                }
            }
            for c in 0..nlist {
                // An empty partition keeps its previous centroid.
                if counts[c] == 0 {
                    continue;
                }
                let inv = 1.0 / counts[c] as f32;
                centroids[c] = sums[c].iter().map(|s| s * inv).collect();
                centroid_norms[c] = magnitude(&centroids[c]);
            }
        }

        let mut index = Self {
            centroids,
            centroid_norms,
            lists: vec![Vec::new(); nlist],
            nprobe,
            trained_on: n,
        };
        for pos in 0..n {
            index.assign(entries, pos, metric);
        }

        debug!(
            "trained partitioned index: {n} vectors, nlist={nlist}, nprobe={}",
            index.nprobe
        );
        index
    }

    /// Place `entries[position]` in its nearest partition.
    pub fn assign(&mut self, entries: &[Entry], position: usize, metric: SimilarityMetric) {
        let e = &entries[position];
        let c = nearest_centroid(
            &self.centroids,
            &self.centroid_norms,
            metric,
            &e.vector,
            e.norm,
        );
        self.lists[c].push(position);
    }

    pub fn trained_on(&self) -> usize {
        self.trained_on
    }

    pub fn nlist(&self) -> usize {
        self.centroids.len()
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }
}

fn nearest_centroid(
    centroids: &[Vec<f32>],
    norms: &[f32],
    metric: SimilarityMetric,
    vector: &[f32],
    norm: f32,
) -> usize {
    top_k(0..centroids.len(), 1, |c| {
        metric.score(vector, norm, &centroids[c], norms[c])
    })
    .first()
    .map_or(0, |best| best.position)
}

impl NearestNeighbors for IvfIndex {
    fn name(&self) -> &'static str {
        "ivf"
    }

    fn nearest(
        &self,
        entries: &[Entry],
        metric: SimilarityMetric,
        query: &Query<'_>,
    ) -> Vec<Candidate> {
        let ranked = top_k(0..self.centroids.len(), self.centroids.len(), |c| {
            metric.score(
                query.vector,
                query.norm,
                &self.centroids[c],
                self.centroid_norms[c],
            )
        });

        // Probe at least `nprobe` partitions, and keep going until there
        // are enough members to fill k.
        let mut members: Vec<usize> = Vec::new();
        for (probed, partition) in ranked.iter().enumerate() {
            if probed >= self.nprobe && members.len() >= query.k {
                break;
            }
            members.extend_from_slice(&self.lists[partition.position]);
        }

        top_k(members, query.k, |i| {
            let e = &entries[i];
            metric.score(query.vector, query.norm, &e.vector, e.norm)
        })
    }
}
