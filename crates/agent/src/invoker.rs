use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use colloquy_core::config::LlmConfig;
use colloquy_core::errors::ModelFailure;

use crate::llm::{CompletionRequest, LlmClient, LlmError, PromptTurn};

/// Bounded retry for transport failures. `max_retries = 0` means a single
/// attempt per turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn single_attempt() -> Self {
        Self::default()
    }

    /// Delay before retry number `attempt` (1-based): `backoff * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

pub struct ModelInvoker {
    client: Arc<dyn LlmClient>,
    temperature: f32,
    max_tokens: u32,
    deadline: Duration,
    retry: RetryPolicy,
}

impl ModelInvoker {
    pub fn new(
        client: Arc<dyn LlmClient>,
        temperature: f32,
        max_tokens: u32,
        deadline: Duration,
    ) -> Self {
        Self { client, temperature, max_tokens, deadline, retry: RetryPolicy::single_attempt() }
    }

    pub fn from_config(client: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self::new(
            client,
            config.temperature,
            config.max_tokens,
            Duration::from_secs(config.timeout_secs),
        )
        .with_retry(RetryPolicy {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the first completion. Zero completions (or a blank one) is
    /// `EmptyResponse` and is never retried.
    pub async fn invoke(&self, turns: Vec<PromptTurn>) -> Result<String, ModelFailure> {
        let request = CompletionRequest {
            turns,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            deadline: self.deadline,
        };

        let mut attempt = 0;
        loop {
            match self.attempt(&request).await {
                Ok(completions) => {
                    return completions
                        .into_iter()
                        .next()
                        .filter(|reply| !reply.trim().is_empty())
                        .ok_or(ModelFailure::EmptyResponse);
                }
                Err(error) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    info!(
                        event_name = "chat.model.retry",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying model invocation"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    warn!(
                        event_name = "chat.model.failed",
                        attempts = attempt + 1,
                        error = %error,
                        "model invocation failed"
                    );
                    return Err(ModelFailure::Transport(error.to_string()));
                }
            }
        }
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<Vec<String>, LlmError> {
        tokio::time::timeout(self.deadline, self.client.complete_chat(request))
            .await
            .map_err(|_| LlmError::Timeout(self.deadline))?
    }
}
