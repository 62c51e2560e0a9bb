//! In-memory vector index with file persistence.
//!
//! Entries are `(vector, chunk)` pairs kept in insertion order. Search is an
//! exact scan until the corpus reaches the configured approximate threshold,
//! after which an inverted-file partition index answers instead. Either way
//! results are best-first with ties broken by insertion order.
mod ivf;
pub mod metric;
mod persist;
mod search;

use std::fmt;

use tracing::{debug, info};

use crate::error::{RagError, Result};
use crate::models::{Chunk, EmbeddingVector, RetrievalResult, ScoredChunk};

use ivf::IvfIndex;
pub use metric::SimilarityMetric;
pub use persist::FORMAT_VERSION;
use search::{Entry, FlatScan, NearestNeighbors, Query};

/// When and how to switch from the exact scan to partitioned search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproximateConfig {
    /// Minimum entry count for partitioned search; 0 disables it.
    pub threshold: usize,
    /// Partitions probed per query; 0 picks `max(4, nlist / 8)`.
    pub nprobe: usize,
}

impl Default for ApproximateConfig {
    fn default() -> Self {
        Self {
            threshold: 50_000,
            nprobe: 0,
        }
    }
}

impl From<&crate::config::IndexConfig> for ApproximateConfig {
    fn from(cfg: &crate::config::IndexConfig) -> Self {
        Self {
            threshold: cfg.approximate_threshold,
            nprobe: cfg.nprobe,
        }
    }
}

pub struct VectorIndex {
    /// `None` until the first entry arrives for an index built empty.
    dim: Option<usize>,
    metric: SimilarityMetric,
    entries: Vec<Entry>,
    approximate: ApproximateConfig,
    ivf: Option<IvfIndex>,
}

impl fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dim", &self.dim)
            .field("count", &self.entries.len())
            .field("metric", &self.metric)
            .field("backend", &self.backend().name())
            .finish()
    }
}

impl VectorIndex {
    /// An empty index with a declared dimensionality.
    #[must_use]
    pub fn new(dim: usize, metric: SimilarityMetric) -> Self {
        Self {
            dim: Some(dim),
            metric,
            entries: Vec::new(),
            approximate: ApproximateConfig::default(),
            ivf: None,
        }
    }

    /// Build an index from a batch of entries, keeping their order.
    ///
    /// Every vector must share the dimensionality of the first one. Zero
    /// entries produce a valid empty index whose dimensionality is fixed by
    /// the first later append.
    pub fn build(
        metric: SimilarityMetric,
        entries: impl IntoIterator<Item = (EmbeddingVector, Chunk)>,
    ) -> Result<Self> {
        let mut index = Self {
            dim: None,
            metric,
            entries: Vec::new(),
            approximate: ApproximateConfig::default(),
            ivf: None,
        };
        for (vector, chunk) in entries {
            index.push_checked("build", vector, chunk)?;
        }
        index.refresh_partitions();
        debug!(
            "built index: {} entries, dim={:?}, metric={}",
            index.len(),
            index.dim,
            index.metric
        );
        Ok(index)
    }

    /// Replace the approximate-search settings, training partitions if the
    /// corpus is already large enough.
    #[must_use]
    pub fn with_approximate(mut self, approximate: ApproximateConfig) -> Self {
        self.approximate = approximate;
        self.ivf = None;
        self.refresh_partitions();
        self
    }

    /// Append one entry. The index must be exclusively borrowed.
    pub fn append(&mut self, vector: EmbeddingVector, chunk: Chunk) -> Result<()> {
        self.push_checked("append", vector, chunk)?;
        let position = self.entries.len() - 1;
        if let Some(ivf) = self.ivf.as_mut() {
            ivf.assign(&self.entries, position, self.metric);
        }
        self.refresh_partitions();
        Ok(())
    }

    /// Append a batch of entries atomically: every vector is checked before
    /// the first one is stored, so a mismatch leaves the index unchanged.
    pub fn append_batch(
        &mut self,
        entries: impl IntoIterator<Item = (EmbeddingVector, Chunk)>,
    ) -> Result<usize> {
        let entries: Vec<_> = entries.into_iter().collect();
        let mut expected = self.dim;
        for (vector, chunk) in &entries {
            expected = Some(check_dim(expected, "append", vector, chunk)?);
        }

        let added = entries.len();
        for (vector, chunk) in entries {
            self.push_checked("append", vector, chunk)?;
            let position = self.entries.len() - 1;
            if let Some(ivf) = self.ivf.as_mut() {
                ivf.assign(&self.entries, position, self.metric);
            }
        }
        self.refresh_partitions();
        Ok(added)
    }

    /// Top `min(k, len)` entries most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(RagError::config("k", "must be positive"));
        }
        if let Some(dim) = self.dim {
            if query.len() != dim {
                return Err(RagError::DimensionMismatch {
                    operation: "search",
                    entity: "query".to_string(),
                    expected: dim,
                    actual: query.len(),
                });
            }
        }
        if self.entries.is_empty() {
            return Ok(RetrievalResult::default());
        }

        let backend = self.backend();
        let query = Query {
            vector: query,
            norm: metric::magnitude(query),
            k,
        };
        let hits = backend
            .nearest(&self.entries, self.metric, &query)
            .into_iter()
            .map(|c| ScoredChunk {
                chunk: self.entries[c.position].chunk.clone(),
                score: c.score,
            })
            .collect();
        Ok(RetrievalResult { hits })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Declared dimensionality, `None` for an empty index built without one.
    #[must_use]
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    #[must_use]
    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    /// Whether queries currently go through the partitioned index.
    #[must_use]
    pub fn is_approximate(&self) -> bool {
        self.ivf.is_some()
    }

    /// Stored chunks in insertion order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    fn backend(&self) -> &dyn NearestNeighbors {
        match &self.ivf {
            Some(ivf) => ivf,
            None => &FlatScan,
        }
    }

    fn push_checked(
        &mut self,
        operation: &'static str,
        vector: EmbeddingVector,
        chunk: Chunk,
    ) -> Result<()> {
        self.dim = Some(check_dim(self.dim, operation, &vector, &chunk)?);
        let norm = metric::magnitude(&vector.values);
        self.entries.push(Entry {
            vector: vector.values,
            norm,
            chunk,
        });
        Ok(())
    }

    /// Train partitions once the threshold is crossed, and retrain when the
    /// corpus has doubled since the last training.
    fn refresh_partitions(&mut self) {
        let threshold = self.approximate.threshold;
        let n = self.entries.len();
        if threshold == 0 || n < threshold {
            return;
        }
        let stale = match &self.ivf {
            None => true,
            Some(ivf) => n >= ivf.trained_on() * 2,
        };
        if stale {
            let ivf = IvfIndex::train(&self.entries, self.metric, self.approximate.nprobe);
            info!(
                "partitioned search over {n} vectors: nlist={}, nprobe={}",
                ivf.nlist(),
                ivf.nprobe()
            );
            self.ivf = Some(ivf);
        }
    }
}

/// The dimensionality an index holds after accepting `vector`. An index with
/// no dimension yet adopts the vector's, which must be non-zero.
fn check_dim(
    expected: Option<usize>,
    operation: &'static str,
    vector: &EmbeddingVector,
    chunk: &Chunk,
) -> Result<usize> {
    let actual = vector.dim();
    match expected {
        Some(dim) if dim == actual => Ok(dim),
        None if actual > 0 => Ok(actual),
        expected => Err(RagError::DimensionMismatch {
            operation,
            entity: chunk.id.clone(),
            expected: expected.unwrap_or(1),
            actual,
        }),
    }
}
