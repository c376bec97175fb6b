// Paw Engram: Retrying Embedder
//
// Wraps any EmbeddingProvider with bounded retries and exponential backoff,
// and rejects vectors the codec cannot use (wrong dimension, NaN/inf, zero
// norm). The final error is always `EngineError::EmbeddingProvider`.

use crate::atoms::engram_types::RetryConfig;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::EmbeddingProvider;
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

pub struct RetryingEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    config: RetryConfig,
}

/// Simple deterministic jitter based on attempt number.
fn rand_jitter(attempt: u32) -> f64 {
    let x = attempt.wrapping_mul(2654435761);
    (x % 100) as f64 / 100.0
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn compute_delay(&self, attempt: u32) -> u64 {
        let base = self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(attempt as i32);
        let jitter = (base * 0.1 * rand_jitter(attempt)) as u64;
        let delay = (base as u64).saturating_add(jitter);
        delay.min(self.config.max_delay_ms)
    }

    fn check(&self, vec: &[f32]) -> EngineResult<()> {
        let expected = self.inner.dimension();
        if expected > 0 && vec.len() != expected {
            return Err(EngineError::embedding(
                self.inner.model_name(),
                format!("expected {} dimensions, got {}", expected, vec.len()),
            ));
        }
        if vec.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::embedding(self.inner.model_name(), "non-finite component"));
        }
        if vec.iter().all(|v| *v == 0.0) {
            return Err(EngineError::embedding(self.inner.model_name(), "zero-norm vector"));
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for RetryingEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            let result = match self.inner.embed(text).await {
                Ok(vec) => self.check(&vec).map(|_| vec),
                Err(e) => Err(e),
            };
            match result {
                Ok(vec) => return Ok(vec),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt == self.config.max_retries {
                        break;
                    }
                    let delay = self.compute_delay(attempt);
                    warn!(
                        "[engram] Embedding attempt {}/{} failed, retrying in {}ms: {}",
                        attempt + 1,
                        self.config.max_retries + 1,
                        delay,
                        last_error
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                }
            }
        }

        Err(EngineError::embedding(
            self.inner.model_name(),
            format!("gave up after {} attempts: {}", self.config.max_retries + 1, last_error),
        ))
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
