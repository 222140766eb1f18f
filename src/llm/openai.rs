use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionNamedToolChoice,
        ChatCompletionRequestMessage, ChatCompletionTool, ChatCompletionToolChoiceOption,
        ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionName, FunctionObject,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;

use crate::llm::{ChatResponse, LlmClient, LlmError, ToolChoice, Usage};
use crate::types::{Message, Role, ToolCall, ToolSchema};

/// OpenAI and OpenAI-compatible providers (Groq, Ollama, Together, ...)
/// via base-url override.
pub struct OpenAiClient {
    client:      Client<OpenAIConfig>,
    model:       String,
    temperature: Option<f32>,
}

impl OpenAiClient {
    /// Standard OpenAI client using the OPENAI_API_KEY env var.
    pub fn new(model: impl Into<String>) -> Self {
        Self { client: Client::new(), model: model.into(), temperature: Some(0.0) }
    }

    /// Custom base URL — for Groq, Together, Ollama, Fireworks, etc.
    /// api_base example: "https://api.groq.com/openai/v1"
    pub fn with_base_url(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let config = OpenAIConfig::new().with_api_base(api_base).with_api_key(api_key);
        Self { client: Client::with_config(config), model: model.into(), temperature: Some(0.0) }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn build_tools(tools: &[ToolSchema]) -> Vec<ChatCompletionTool> {
        tools
            .iter()
            .map(|schema| ChatCompletionTool {
                r#type: ChatCompletionToolType::Function,
                function: FunctionObject {
                    name:        schema.name.clone(),
                    description: Some(schema.description.clone()),
                    parameters:  Some(schema.parameters.clone()),
                },
            })
            .collect()
    }

    /// Serialize our messages to the OpenAI wire shape, then round-trip
    /// through serde into async-openai's typed messages.
    fn build_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let mut raw = Vec::new();
        for msg in messages {
            match msg.role {
                Role::System => raw.push(json!({
                    "role": "system",
                    "content": msg.content,
                })),
                Role::User => raw.push(json!({
                    "role": "user",
                    "content": msg.content,
                })),
                Role::Assistant => {
                    let mut m = json!({
                        "role": "assistant",
                        "content": msg.content,
                    });
                    if let Some(calls) = &msg.tool_calls {
                        let tcs: Vec<serde_json::Value> = calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": serde_json::to_string(&tc.arguments)
                                            .unwrap_or_else(|_| "{}".to_string()),
                                    }
                                })
                            })
                            .collect();
                        m["tool_calls"] = serde_json::Value::Array(tcs);
                    }
                    raw.push(m);
                }
                Role::Tool => raw.push(json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                })),
            }
        }

        serde_json::from_value(serde_json::Value::Array(raw))
            .map_err(|e| LlmError::Parse(format!("Failed to build messages: {}", e)))
    }

    fn parse_tool_call(tc: &ChatCompletionMessageToolCall) -> Result<ToolCall, LlmError> {
        let arguments: HashMap<String, serde_json::Value> =
            serde_json::from_str(&tc.function.arguments)
                .map_err(|e| LlmError::Parse(format!("Failed to parse tool args: {}", e)))?;
        Ok(ToolCall { id: tc.id.clone(), name: tc.function.name.clone(), arguments })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse, LlmError> {
        let oai_messages = Self::build_messages(messages)?;
        let oai_tools = Self::build_tools(tools);

        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder.model(&self.model).messages(oai_messages);
        if let Some(t) = self.temperature {
            request_builder.temperature(t);
        }

        if !oai_tools.is_empty() {
            request_builder.tools(oai_tools);
            match tool_choice {
                ToolChoice::Auto => {}
                ToolChoice::None => {
                    request_builder.tool_choice(ChatCompletionToolChoiceOption::None);
                }
                ToolChoice::Tool(name) => {
                    request_builder.tool_choice(ChatCompletionToolChoiceOption::Named(
                        ChatCompletionNamedToolChoice {
                            r#type:   ChatCompletionToolType::Function,
                            function: FunctionName { name },
                        },
                    ));
                }
            }
        }

        let request = request_builder
            .build()
            .map_err(|e| LlmError::Other(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Network(format!("OpenAI API error: {}", e)))?;

        let usage = response
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let choice = response.choices.into_iter().next().ok_or(LlmError::Empty)?;
        let message = choice.message;

        let mut tool_calls = Vec::new();
        if let Some(calls) = message.tool_calls {
            for tc in &calls {
                tool_calls.push(Self::parse_tool_call(tc)?);
            }
        }

        let finish_reason = choice
            .finish_reason
            .map(|r| format!("{:?}", r).to_lowercase())
            .unwrap_or_else(|| "stop".to_string());

        Ok(ChatResponse {
            content: message.content.unwrap_or_default(),
            tool_calls,
            finish_reason,
            usage,
            cache: Default::default(),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
