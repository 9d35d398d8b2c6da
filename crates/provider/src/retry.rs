//! Retry with exponential backoff around any provider

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::{ChatParams, ChatResponse, Provider, Result};

/// How often and how patiently to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Provider wrapper retrying transient failures
pub struct RetryProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: Provider> RetryProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: Provider> Provider for RetryProvider<P> {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        let mut attempt = 0;
        loop {
            match self.inner.chat(params.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "LLM request failed ({}), retry {}/{} in {:?}",
                        e, attempt, self.policy.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn default_model(&self) -> String {
        self.inner.default_model()
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }
}
