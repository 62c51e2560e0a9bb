//! Query-time lookup: one embedding call, then a search over the shared index.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use crate::embedder::{Embedder, embed_within};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::models::RetrievalResult;

/// Shared handle to an index: many concurrent searches, exclusive appends.
pub type SharedIndex = Arc<RwLock<VectorIndex>>;

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: SharedIndex,
    timeout: Duration,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: SharedIndex, timeout: Duration) -> Self {
        Self {
            embedder,
            index,
            timeout,
        }
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    /// Embed `query` and return the `k` most similar chunks, best first.
    ///
    /// A failed or timed-out embedding call yields `EmbeddingUnavailable` and
    /// no partial result. Results are not cached.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(RagError::config("k", "must be positive"));
        }

        let vector = embed_within(self.embedder.as_ref(), query, self.timeout)
            .await
            .map_err(|source| RagError::EmbeddingUnavailable {
                entity: "query".to_string(),
                source,
            })?;

        let result = self.index.read().await.search(&vector, k)?;
        debug!("retrieved {} chunks (k={k})", result.len());
        Ok(result)
    }
}
