use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::embedder::{Embedder, embed_batch_within};
use crate::error::{RagError, Result};
use crate::index::{ApproximateConfig, SimilarityMetric, VectorIndex};
use crate::indexer::chunker::{ChunkingConfig, chunk_document};
use crate::models::{Chunk, Document, EmbeddingVector};

/// Called with the number of chunks embedded by each finished batch.
pub type ProgressFn = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IndexSyncResult {
    pub documents: usize,
    pub chunks: usize,
    pub batches: usize,
}

/// Build-time pipeline: documents are chunked, chunks are embedded in
/// concurrent batches, and the vectors land in the index in chunk order.
pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    metric: SimilarityMetric,
    batch_size: usize,
    concurrency_limit: usize,
    timeout: Duration,
    approximate: ApproximateConfig,
    progress: Option<ProgressFn>,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>, chunking: ChunkingConfig, metric: SimilarityMetric) -> Self {
        Self {
            embedder,
            chunking,
            metric,
            batch_size: 16,
            concurrency_limit: 4,
            timeout: Duration::from_secs(30),
            approximate: ApproximateConfig::default(),
            progress: None,
        }
    }

    /// Builder with every knob taken from `config`.
    pub fn from_config(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        Self::new(embedder, config.chunking(), config.similarity_metric)
            .batch_size(config.embedding_batch_size)
            .concurrency_limit(config.embedding_concurrency_limit)
            .timeout(config.request_timeout())
            .approximate(ApproximateConfig::from(&config.index))
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn approximate(mut self, approximate: ApproximateConfig) -> Self {
        self.approximate = approximate;
        self
    }

    #[must_use]
    pub fn on_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Chunk every document without embedding anything. Useful for sizing
    /// progress reporting before [`IndexBuilder::build`].
    pub fn chunk_all(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        self.chunking.validate()?;
        let mut chunks = Vec::new();
        for document in documents {
            chunks.extend(chunk_document(document, self.chunking)?);
        }
        Ok(chunks)
    }

    /// Build a fresh index over `documents`.
    pub async fn build(&self, documents: &[Document]) -> Result<VectorIndex> {
        let chunks = self.chunk_all(documents)?;
        let vectors = self.embed_chunks(&chunks).await?;
        let mut index = match self.embedder.dimensions() {
            0 => VectorIndex::build(self.metric, Vec::new())?,
            dims => VectorIndex::new(dims, self.metric),
        }
        .with_approximate(self.approximate);
        index.append_batch(pair(vectors, chunks))?;
        info!(
            "built index from {} documents: {} chunks, dim={:?}",
            documents.len(),
            index.len(),
            index.dim()
        );
        Ok(index)
    }

    /// [`IndexBuilder::build`] that gives up with `Cancelled` once `cancel` fires.
    pub async fn build_with_cancel(
        &self,
        documents: &[Document],
        cancel: &CancellationToken,
    ) -> Result<VectorIndex> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RagError::Cancelled { operation: "build" }),
            result = self.build(documents) => result,
        }
    }

    /// Embed `documents` and append them to an existing index.
    ///
    /// Embedding happens before the index is touched and the vectors go in
    /// as one batch, so a backend failure or a dimension mismatch leaves the
    /// index unchanged.
    pub async fn extend(
        &self,
        index: &mut VectorIndex,
        documents: &[Document],
    ) -> Result<IndexSyncResult> {
        let chunks = self.chunk_all(documents)?;
        let batches = chunks.len().div_ceil(self.batch_size.max(1));
        let vectors = self.embed_chunks(&chunks).await?;
        let added = index.append_batch(pair(vectors, chunks))?;
        info!("appended {added} chunks from {} documents", documents.len());
        Ok(IndexSyncResult {
            documents: documents.len(),
            chunks: added,
            batches,
        })
    }

    /// Embed chunk texts in batches, at most `concurrency_limit` in flight,
    /// returning vectors in the same order as `chunks`.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        if self.batch_size == 0 {
            return Err(RagError::config("embedding_batch_size", "must be positive"));
        }
        if self.concurrency_limit == 0 {
            return Err(RagError::config(
                "embedding_concurrency_limit",
                "must be positive",
            ));
        }
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "embedding {} chunks in batches of {} (concurrency {})",
            chunks.len(),
            self.batch_size,
            self.concurrency_limit
        );

        let timeout = self.timeout;
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(chunks.chunks(self.batch_size))
            .map(|batch| {
                let embedder = Arc::clone(&self.embedder);
                let progress = self.progress.clone();
                async move {
                    let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
                    let vectors = embed_batch_within(embedder.as_ref(), &texts, timeout)
                        .await
                        .map_err(|source| RagError::EmbeddingUnavailable {
                            entity: batch[0].id.clone(),
                            source,
                        })?;
                    if let Some(progress) = progress {
                        progress(batch.len());
                    }
                    Ok::<_, RagError>(vectors)
                }
            })
            .buffered(self.concurrency_limit)
            .try_collect()
            .await?;

        Ok(batches.into_iter().flatten().collect())
    }
}

fn pair(vectors: Vec<Vec<f32>>, chunks: Vec<Chunk>) -> impl Iterator<Item = (EmbeddingVector, Chunk)> {
    vectors
        .into_iter()
        .zip(chunks)
        .map(|(values, chunk)| (EmbeddingVector::new(chunk.id.clone(), values), chunk))
}
