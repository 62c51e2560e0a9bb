//! Generation port: prompt text in, answer text out.
pub mod mock;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{BackendProvider, Config};

/// Errors that can occur during text generation.
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("generation failed: {0}")]
    Failed(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Trait for answer-generation backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for a fully assembled prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError>;
}

/// Construct the generator selected by `config.generation`.
pub fn from_config(config: &Config) -> anyhow::Result<Arc<dyn Generator>> {
    let backend = &config.generation;
    match backend.provider {
        BackendProvider::Mock => Ok(Arc::new(mock::MockGenerator::echo())),
        BackendProvider::OpenAi => {
            let generator = openai::OpenAiGenerator::new(
                backend.endpoint.clone(),
                backend.model.clone(),
                backend.api_key(),
                config.request_timeout(),
            )?;
            Ok(Arc::new(generator))
        }
    }
}
