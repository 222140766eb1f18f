use async_trait::async_trait;
use std::sync::Arc;

use crate::llm::{ChatResponse, LlmClient, LlmError, ToolChoice};
use crate::types::{Message, ToolSchema};

/// A wrapper around any `LlmClient` that retries transient failures
/// with exponential back-off.
///
/// - Auth errors (401/403) are never retried
/// - Rate limits get a longer initial wait
/// - The wrapped adapter itself stays retry-free
pub struct RetryingLlm {
    inner:       Arc<dyn LlmClient>,
    max_retries: u32,
}

impl RetryingLlm {
    pub fn new(inner: Arc<dyn LlmClient>, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }
}

#[async_trait]
impl LlmClient for RetryingLlm {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse, LlmError> {
        let mut last_err = None;
        let mut rate_limited = false;

        for attempt in 0..=self.max_retries {
            match self.inner.chat(messages, tools, tool_choice.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_auth() => {
                    tracing::error!(error = %e, "LLM auth error — not retrying");
                    return Err(e);
                }
                Err(e) => {
                    if e.is_rate_limit() {
                        rate_limited = true;
                    }

                    if attempt < self.max_retries {
                        // For rate limits, use a longer initial wait
                        let base_wait = if e.is_rate_limit() { 5u64 } else { 1u64 };
                        let wait_secs = std::cmp::min(base_wait << attempt, 60);

                        tracing::warn!(
                            attempt = attempt + 1,
                            max     = self.max_retries,
                            wait_s  = wait_secs,
                            error   = %e,
                            "LLM transient error — retrying"
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(wait_secs)).await;
                    }
                    last_err = Some(e);
                }
            }
        }

        let prefix = if rate_limited { "LLM rate limit exceeded" } else { "LLM failed" };
        Err(LlmError::Other(format!(
            "{} after {} retries — last error: {}",
            prefix,
            self.max_retries,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let mock = MockLlm::scripted(vec![
            Err("connection reset".to_string()),
            Ok(ChatResponse::text("recovered")),
        ]);
        let retrying = RetryingLlm::new(Arc::new(mock), 2);

        let resp = retrying.chat(&[], &[], ToolChoice::Auto).await.unwrap();
        assert_eq!(resp.content, "recovered");
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        struct AuthFail;
        #[async_trait]
        impl LlmClient for AuthFail {
            async fn chat(
                &self,
                _: &[Message],
                _: &[ToolSchema],
                _: ToolChoice,
            ) -> Result<ChatResponse, LlmError> {
                Err(LlmError::Auth("bad key".to_string()))
            }
            fn model(&self) -> &str {
                "auth-fail"
            }
        }

        let retrying = RetryingLlm::new(Arc::new(AuthFail), 3);
        let err = retrying.chat(&[], &[], ToolChoice::Auto).await.unwrap_err();
        assert!(err.is_auth());
    }
}
