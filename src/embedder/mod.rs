//! Embedding port: turns text into fixed-length vectors.
//!
//! The core only ever talks to the [`Embedder`] trait. Concrete backends live
//! in submodules: [`mock`] for tests and offline runs, [`openai`] for any
//! OpenAI-compatible `/embeddings` endpoint.
pub mod mock;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{BackendProvider, Config};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Run one embedding call under a deadline.
pub async fn embed_within(
    embedder: &dyn Embedder,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, EmbedderError> {
    match tokio::time::timeout(timeout, embedder.embed(text)).await {
        Ok(result) => result,
        Err(_) => Err(EmbedderError::Timeout(timeout)),
    }
}

/// Run one batch embedding call under a deadline and check the batch shape.
pub async fn embed_batch_within(
    embedder: &dyn Embedder,
    texts: &[&str],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    let vectors = match tokio::time::timeout(timeout, embedder.embed_batch(texts)).await {
        Ok(result) => result?,
        Err(_) => return Err(EmbedderError::Timeout(timeout)),
    };
    if vectors.len() != texts.len() {
        return Err(EmbedderError::InvalidResponse(format!(
            "expected {} vectors, got {}",
            texts.len(),
            vectors.len()
        )));
    }
    Ok(vectors)
}

/// Construct the embedder selected by `config.embedding`.
pub fn from_config(config: &Config) -> anyhow::Result<Arc<dyn Embedder>> {
    let backend = &config.embedding;
    match backend.provider {
        BackendProvider::Mock => Ok(Arc::new(mock::MockEmbedder::new(backend.dimensions))),
        BackendProvider::OpenAi => {
            let embedder = openai::OpenAiEmbedder::new(
                backend.endpoint.clone(),
                backend.model.clone(),
                backend.api_key(),
                backend.dimensions,
                config.request_timeout(),
            )?;
            Ok(Arc::new(embedder))
        }
    }
}
