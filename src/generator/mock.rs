//! Scriptable generator for tests and offline runs.
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Generator, GeneratorError};

pub struct MockGenerator {
    reply: Option<String>,
    failures_before_success: u32,
    delay: Option<Duration>,
    attempts: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    /// Answers with the prompt it was given.
    #[must_use]
    pub fn echo() -> Self {
        Self {
            reply: None,
            failures_before_success: 0,
            delay: None,
            attempts: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answers every prompt with `reply`.
    #[must_use]
    pub fn fixed(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            ..Self::echo()
        }
    }

    /// Fail the first `n` calls, then behave normally. `u32::MAX` never recovers.
    #[must_use]
    pub fn failing_first(mut self, n: u32) -> Self {
        self.failures_before_success = n;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `generate` calls so far, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Prompts received by successful calls, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if attempt < self.failures_before_success {
            return Err(GeneratorError::Failed(format!(
                "mock generator scripted failure #{}",
                attempt + 1
            )));
        }

        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        Ok(self.reply.clone().unwrap_or_else(|| prompt.to_string()))
    }
}
