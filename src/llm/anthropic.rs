use async_trait::async_trait;
use serde_json::json;

use crate::llm::{CacheInfo, ChatResponse, LlmClient, LlmError, ToolChoice, Usage};
use crate::types::{Message, Role, ToolCall, ToolSchema};

/// User messages above this size get a cache-control marker.
const CACHE_USER_MESSAGE_BYTES: usize = 2000;

// ── Anthropic request types ──────────────────────────────

#[derive(serde::Serialize)]
struct AnthropicRequest {
    model:      String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system:     Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    tools:      Vec<AnthropicToolDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking:   Option<serde_json::Value>,
    messages:   Vec<AnthropicMessage>,
}

#[derive(serde::Serialize)]
struct AnthropicToolDef {
    name:         String,
    description:  String,
    input_schema: serde_json::Value,
}

#[derive(serde::Serialize, serde::Deserialize, Clone)]
struct AnthropicMessage {
    role:    String,
    content: serde_json::Value, // string or array of content blocks
}

// ── Anthropic response types ─────────────────────────────

#[derive(serde::Deserialize, Debug)]
struct AnthropicResponse {
    content:     Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage:       AnthropicUsage,
}

#[derive(serde::Deserialize, Debug, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens:  u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens:     u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
}

#[derive(serde::Deserialize, Debug)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id:    String,
        name:  String,
        input: serde_json::Value,
    },

    #[serde(other)]
    Other,
}

// ── Client ───────────────────────────────────────────────

pub struct AnthropicClient {
    client:     reqwest::Client,
    api_key:    String,
    api_base:   String,
    model:      String,
    max_tokens: u32,
    temperature: Option<f64>,
    reasoning_effort: Option<String>,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client:     reqwest::Client::new(),
            api_key:    api_key.into(),
            api_base:   "https://api.anthropic.com".to_string(),
            model:      model.into(),
            max_tokens: 16384,
            temperature: Some(0.0),
            reasoning_effort: None,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, LlmError> {
        let key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| LlmError::Auth("ANTHROPIC_API_KEY not set".to_string()))?;
        Ok(Self::new(key, model))
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Extended-thinking knob; unset means no thinking block is sent.
    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    fn build_tool_defs(tools: &[ToolSchema]) -> Vec<AnthropicToolDef> {
        tools
            .iter()
            .map(|s| AnthropicToolDef {
                name:         s.name.clone(),
                description:  s.description.clone(),
                input_schema: s.parameters.clone(),
            })
            .collect()
    }

    fn thinking_config(&self) -> Option<serde_json::Value> {
        let budget = match self.reasoning_effort.as_deref()? {
            "low" => 1024,
            "medium" => 4096,
            "high" => 16384,
            _ => return None,
        };
        Some(json!({ "type": "enabled", "budget_tokens": budget }))
    }

    /// The system prompt goes out as a cache-marked content block so the
    /// provider can reuse it across iterations.
    fn build_system(messages: &[Message]) -> Option<serde_json::Value> {
        let text: String = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        if text.is_empty() {
            return None;
        }
        Some(json!([{
            "type": "text",
            "text": text,
            "cache_control": { "type": "ephemeral" }
        }]))
    }

    /// Convert the context messages to Anthropic's shape. Tool results
    /// are user-role `tool_result` blocks; consecutive results for one
    /// assistant turn merge into a single user message.
    fn build_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        let mut out: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {} // sent separately
                Role::User => {
                    let content = if msg.content.len() > CACHE_USER_MESSAGE_BYTES {
                        json!([{
                            "type": "text",
                            "text": msg.content,
                            "cache_control": { "type": "ephemeral" }
                        }])
                    } else {
                        json!(msg.content)
                    };
                    out.push(AnthropicMessage { role: "user".to_string(), content });
                }
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": msg.content }));
                    }
                    if let Some(calls) = &msg.tool_calls {
                        for tc in calls {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": tc.arguments,
                            }));
                        }
                    }
                    if blocks.is_empty() {
                        blocks.push(json!({ "type": "text", "text": "" }));
                    }
                    out.push(AnthropicMessage {
                        role:    "assistant".to_string(),
                        content: serde_json::Value::Array(blocks),
                    });
                }
                Role::Tool => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.content,
                    });
                    // Merge into the previous user message if it is
                    // already a tool_result carrier.
                    let merged = match out.last_mut() {
                        Some(prev)
                            if prev.role == "user"
                                && prev
                                    .content
                                    .as_array()
                                    .and_then(|a| a.first())
                                    .and_then(|b| b.get("type"))
                                    .map(|t| t == "tool_result")
                                    .unwrap_or(false) =>
                        {
                            if let Some(arr) = prev.content.as_array_mut() {
                                arr.push(block.clone());
                            }
                            true
                        }
                        _ => false,
                    };
                    if !merged {
                        out.push(AnthropicMessage {
                            role:    "user".to_string(),
                            content: serde_json::Value::Array(vec![block]),
                        });
                    }
                }
            }
        }

        out
    }

    fn build_tool_choice(choice: &ToolChoice) -> Option<serde_json::Value> {
        match choice {
            ToolChoice::Auto => None,
            ToolChoice::None => Some(json!({ "type": "none" })),
            ToolChoice::Tool(name) => Some(json!({ "type": "tool", "name": name })),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse, LlmError> {
        let body = AnthropicRequest {
            model:       self.model.clone(),
            max_tokens:  self.max_tokens,
            system:      Self::build_system(messages),
            temperature: self.temperature,
            tools:       Self::build_tool_defs(tools),
            tool_choice: Self::build_tool_choice(&tool_choice),
            thinking:    self.thinking_config(),
            messages:    Self::build_messages(messages),
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LlmError::Auth(message));
            }
            return Err(LlmError::Api { status: status.as_u16(), message });
        }

        let parsed: AnthropicResponse =
            response.json().await.map_err(|e| LlmError::Parse(e.to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                AnthropicContentBlock::Text { text } => {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(&text);
                }
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    let arguments = serde_json::from_value(input)
                        .map_err(|e| LlmError::Parse(format!("Invalid tool args: {}", e)))?;
                    tool_calls.push(ToolCall { id, name, arguments });
                }
                AnthropicContentBlock::Other => {}
            }
        }

        if content.is_empty() && tool_calls.is_empty() {
            return Err(LlmError::Empty);
        }

        Ok(ChatResponse {
            content,
            tool_calls,
            finish_reason: parsed.stop_reason.unwrap_or_else(|| "stop".to_string()),
            usage: Usage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
            cache: CacheInfo {
                cache_read_input_tokens:     parsed.usage.cache_read_input_tokens,
                cache_creation_input_tokens: parsed.usage.cache_creation_input_tokens,
            },
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
