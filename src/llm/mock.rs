use async_trait::async_trait;
use std::sync::Mutex;

use crate::llm::{ChatResponse, LlmClient, LlmError, ToolChoice};
use crate::types::{Message, ToolSchema};

/// A scripted LLM client for tests: returns queued responses in order
/// and records every call for assertions. No network calls are made.
pub struct MockLlm {
    responses: Mutex<Vec<Result<ChatResponse, String>>>,
    call_log:  Mutex<Vec<Vec<Message>>>,
    model:     String,
}

impl MockLlm {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            call_log:  Mutex::new(Vec::new()),
            model:     "mock-model".to_string(),
        }
    }

    /// Script a mix of successes and errors.
    pub fn scripted(responses: Vec<Result<ChatResponse, String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_log:  Mutex::new(Vec::new()),
            model:     "mock-model".to_string(),
        }
    }

    /// Returns the number of times chat() was invoked.
    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    /// The messages passed to the Nth call (0-indexed).
    pub fn messages_for_call(&self, n: usize) -> Option<Vec<Message>> {
        self.call_log.lock().unwrap().get(n).cloned()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(
        &self,
        messages: &[Message],
        _tools: &[ToolSchema],
        _tool_choice: ToolChoice,
    ) -> Result<ChatResponse, LlmError> {
        self.call_log.lock().unwrap().push(messages.to_vec());

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::Other("MockLlm: no more programmed responses".to_string()));
        }
        responses.remove(0).map_err(LlmError::Other)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
