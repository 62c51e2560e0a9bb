//! Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
//!
//! Works against OpenAI itself and against local servers exposing the same
//! API (Ollama, llama.cpp server, vLLM).
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dims: usize,
    timeout: Duration,
}

impl OpenAiEmbedder {
    /// Create a new embedder. `endpoint` is the API base, e.g. `https://api.openai.com/v1`.
    pub fn new(
        endpoint: String,
        model: String,
        api_key: Option<String>,
        dims: usize,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ragindex/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("HTTP client build failed")?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            api_key,
            dims,
            timeout,
        })
    }

    fn map_reqwest(&self, e: reqwest::Error) -> EmbedderError {
        if e.is_timeout() {
            EmbedderError::Timeout(self.timeout)
        } else {
            EmbedderError::Request(e.to_string())
        }
    }
}

/// Vectors in input order. The API does not promise to return items in
/// input order, and a server configured for another model can answer with a
/// different length than `dims`.
fn ordered_embeddings(
    mut response: EmbeddingResponse,
    dims: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    response.data.sort_by_key(|d| d.index);
    if let Some(bad) = response.data.iter().find(|d| d.embedding.len() != dims) {
        return Err(EmbedderError::InvalidResponse(format!(
            "embedding {} has {} dimensions, expected {dims}",
            bad.index,
            bad.embedding.len()
        )));
    }
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::InvalidResponse("empty embedding list".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.endpoint);
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        debug!("POST {url} ({} inputs)", texts.len());

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.map_reqwest(e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedderError::Request(format!("API error {status}: {body}")));
        }

        let result: EmbeddingResponse = response.json().await.map_err(|e| self.map_reqwest(e))?;
        ordered_embeddings(result, self.dims)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
