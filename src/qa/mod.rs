//! Question answering over the retriever: bounded context, one generation
//! call (optionally retried), and the ids of the chunks that were used.
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, RetryConfig};
use crate::error::{RagError, Result};
use crate::generator::{Generator, GeneratorError};
use crate::models::Answer;
use crate::retriever::Retriever;

use prompt::{build_context, format_prompt};

/// Bounded retry with exponential backoff for generation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 disables retry.
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for each one after.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            backoff: Duration::from_millis(cfg.backoff_ms),
        }
    }
}

impl RetryPolicy {
    fn delay_before(&self, attempt: u32) -> Duration {
        // attempt is 1-based; the first retry waits `backoff`.
        let exponent = attempt.saturating_sub(2).min(16);
        self.backoff.saturating_mul(1u32 << exponent)
    }
}

pub struct Orchestrator {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self {
            retriever,
            generator,
            timeout,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &Config, retriever: Retriever, generator: Arc<dyn Generator>) -> Self {
        Self::new(retriever, generator, config.request_timeout())
            .with_retry(RetryPolicy::from(&config.retry))
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Retrieve up to `k` chunks for `query`, pack as many of the best ones
    /// as fit in `max_context_chars`, and generate an answer.
    ///
    /// An empty retrieval is not an error: the generator is still called,
    /// with a prompt that says no context was found.
    pub async fn answer(&self, query: &str, k: usize, max_context_chars: usize) -> Result<Answer> {
        if max_context_chars == 0 {
            return Err(RagError::config("max_context_chars", "must be positive"));
        }

        let retrieved = self.retriever.retrieve(query, k).await?;
        let context = build_context(&retrieved.hits, max_context_chars);
        if retrieved.is_empty() {
            info!("no chunks retrieved, generating without context");
        } else if context.is_empty() {
            info!(
                "top chunk exceeds max_context_chars={max_context_chars}, generating without context"
            );
        } else if context.chunk_ids.len() < retrieved.len() {
            debug!(
                "context holds {} of {} retrieved chunks ({} chars)",
                context.chunk_ids.len(),
                retrieved.len(),
                context.char_len()
            );
        }

        let prompt = format_prompt(query, &context);
        let text = self.generate_with_retry(&prompt).await?;
        Ok(Answer {
            text,
            used_chunk_ids: context.chunk_ids,
        })
    }

    /// [`Orchestrator::answer`] that returns `Cancelled` as soon as `cancel` fires.
    pub async fn answer_with_cancel(
        &self,
        query: &str,
        k: usize,
        max_context_chars: usize,
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RagError::Cancelled { operation: "answer" }),
            result = self.answer(query, k, max_context_chars) => result,
        }
    }

    async fn generate_with_retry(&self, prompt: &str) -> Result<String> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.generate_once(prompt).await {
                Ok(text) => return Ok(text),
                Err(source) if attempt >= max_attempts => {
                    return Err(RagError::GenerationUnavailable {
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    attempt += 1;
                    let delay = self.retry.delay_before(attempt);
                    warn!(
                        "generation failed ({e}), retrying in {}ms (attempt {attempt}/{max_attempts})",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn generate_once(&self, prompt: &str) -> std::result::Result<String, GeneratorError> {
        match tokio::time::timeout(self.timeout, self.generator.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(GeneratorError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::generator::mock::MockGenerator;
    use crate::index::{SimilarityMetric, VectorIndex};
    use crate::models::{Chunk, EmbeddingVector};
    use tokio::sync::RwLock;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: id.split('#').next().unwrap_or(id).to_string(),
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.chars().count(),
        }
    }

    /// Three chunks whose similarity to the query vector [1, 0] decreases with the index.
    fn retriever() -> Retriever {
        let entries = vec![
            (EmbeddingVector::new("a#0", vec![1.0, 0.0]), chunk("a#0", &"a".repeat(40))),
            (EmbeddingVector::new("b#0", vec![0.8, 0.6]), chunk("b#0", &"b".repeat(40))),
            (EmbeddingVector::new("c#0", vec![0.6, 0.8]), chunk("c#0", &"c".repeat(40))),
        ];
        let index = VectorIndex::build(SimilarityMetric::Cosine, entries).unwrap();
        let embedder = MockEmbedder::new(2).with_vector("question", vec![1.0, 0.0]);
        Retriever::new(
            Arc::new(embedder),
            Arc::new(RwLock::new(index)),
            Duration::from_secs(1),
        )
    }

    fn empty_retriever() -> Retriever {
        Retriever::new(
            Arc::new(MockEmbedder::new(2)),
            Arc::new(RwLock::new(VectorIndex::new(2, SimilarityMetric::Cosine))),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_answer_reports_used_chunks_in_rank_order() {
        let generator = Arc::new(MockGenerator::fixed("done"));
        let qa = Orchestrator::new(retriever(), generator.clone(), Duration::from_secs(1));
        let answer = qa.answer("question", 3, 4000).await.unwrap();
        assert_eq!(answer.text, "done");
        assert_eq!(answer.used_chunk_ids, vec!["a#0", "b#0", "c#0"]);
        assert_eq!(generator.attempts(), 1);
    }

    #[tokio::test]
    async fn test_answer_truncates_lowest_ranked() {
        let generator = Arc::new(MockGenerator::echo());
        let qa = Orchestrator::new(retriever(), generator.clone(), Duration::from_secs(1));
        // Each passage is 44 chars; two with the separator need 90.
        let answer = qa.answer("question", 3, 90).await.unwrap();
        assert_eq!(answer.used_chunk_ids, vec!["a#0", "b#0"]);

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains(&"a".repeat(40)));
        assert!(prompt.contains(&"b".repeat(40)));
        assert!(!prompt.contains(&"c".repeat(40)));
    }

    #[tokio::test]
    async fn test_empty_retrieval_still_generates() {
        let generator = Arc::new(MockGenerator::echo());
        let qa = Orchestrator::new(empty_retriever(), generator.clone(), Duration::from_secs(1));
        let answer = qa.answer("anything", 4, 4000).await.unwrap();
        assert!(answer.used_chunk_ids.is_empty());
        assert_eq!(generator.attempts(), 1);
        assert!(answer.text.contains("No reference passages"));
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let generator = Arc::new(MockGenerator::echo().failing_first(1));
        let qa = Orchestrator::new(retriever(), generator.clone(), Duration::from_secs(1));
        match qa.answer("question", 2, 4000).await {
            Err(RagError::GenerationUnavailable { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(generator.attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_second_attempt() {
        let generator = Arc::new(MockGenerator::fixed("ok").failing_first(1));
        let qa = Orchestrator::new(retriever(), generator.clone(), Duration::from_secs(1))
            .with_retry(RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            });
        let answer = qa.answer("question", 2, 4000).await.unwrap();
        assert_eq!(answer.text, "ok");
        assert_eq!(generator.attempts(), 2);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let generator = Arc::new(MockGenerator::echo().failing_first(u32::MAX));
        let qa = Orchestrator::new(retriever(), generator.clone(), Duration::from_secs(1))
            .with_retry(RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            });
        match qa.answer("question", 2, 4000).await {
            Err(RagError::GenerationUnavailable { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, GeneratorError::Failed(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(generator.attempts(), 3);
    }

    #[tokio::test]
    async fn test_generation_timeout() {
        let generator = Arc::new(MockGenerator::echo().with_delay(Duration::from_secs(5)));
        let qa = Orchestrator::new(retriever(), generator, Duration::from_millis(20));
        match qa.answer("question", 2, 4000).await {
            Err(RagError::GenerationUnavailable { source, .. }) => {
                assert!(matches!(source, GeneratorError::Timeout(_)));
                assert!(source.to_string().contains("20ms"), "{source}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_context_budget_rejected() {
        let generator = Arc::new(MockGenerator::echo());
        let qa = Orchestrator::new(retriever(), generator.clone(), Duration::from_secs(1));
        assert!(matches!(
            qa.answer("question", 2, 0).await,
            Err(RagError::Configuration { .. })
        ));
        assert_eq!(generator.attempts(), 0);
    }

    #[tokio::test]
    async fn test_answer_cancelled() {
        let generator = Arc::new(MockGenerator::echo().with_delay(Duration::from_secs(5)));
        let qa = Orchestrator::new(retriever(), generator, Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert!(matches!(
            qa.answer_with_cancel("question", 2, 4000, &cancel).await,
            Err(RagError::Cancelled { operation: "answer" })
        ));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
    }
}
