use crate::types::{Message, ToolCall, ToolSchema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod anthropic;
mod mock;
mod openai;
mod retry;

pub use anthropic::AnthropicClient;
pub use mock::MockLlm;
pub use openai::OpenAiClient;
pub use retry::RetryingLlm;

/// How the LLM may use tools on this call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    /// Force a specific tool by name.
    Tool(String),
}

/// Tracks token usage for a single LLM call or an entire session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens:     u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self { prompt_tokens: prompt, completion_tokens: completion }
    }

    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Accumulate usage from another call
    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Prompt-cache metrics, populated by providers that report them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheInfo {
    pub cache_read_input_tokens:     u32,
    pub cache_creation_input_tokens: u32,
}

impl CacheInfo {
    pub fn cache_hit(&self) -> bool {
        self.cache_read_input_tokens > 0
    }
}

/// Structured response from a single chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content:       String,
    pub tool_calls:    Vec<ToolCall>,
    pub finish_reason: String,
    pub usage:         Usage,
    pub cache:         CacheInfo,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), finish_reason: "stop".to_string(), ..Default::default() }
    }

    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            finish_reason: "tool_calls".to_string(),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Provider returned empty content")]
    Empty,

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Auth failures are terminal; retrying cannot help.
    pub fn is_auth(&self) -> bool {
        match self {
            LlmError::Auth(_) => true,
            LlmError::Api { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        match self {
            LlmError::Api { status, .. } => *status == 429,
            LlmError::Network(m) | LlmError::Other(m) => {
                let lower = m.to_lowercase();
                lower.contains("rate limit") || lower.contains("too many requests")
            }
            _ => false,
        }
    }
}

/// The single outbound LLM edge.
///
/// # Contract
/// - Must be Send + Sync (used behind Arc<dyn LlmClient>)
/// - Serializes the given messages to the provider's shape and forwards
///   tool schemas verbatim
/// - Performs no retries: the loop (or the [`RetryingLlm`] wrapper)
///   decides what to do with failures
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse, LlmError>;

    /// The model id this client calls.
    fn model(&self) -> &str;
}
