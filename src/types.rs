use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who authored a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tool invocation requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id:        String,
    pub name:      String,
    pub arguments: HashMap<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }
}

/// One entry in a conversation.
///
/// Assistant messages may carry tool calls; tool messages answer exactly
/// one call id. The pairing invariant is enforced by
/// [`ContextWindow::validate_and_repair`](crate::context::ContextWindow::validate_and_repair).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role:    Role,
    pub content: String,

    /// Tool invocations attached to an assistant message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// The call id a tool message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool name, for tool messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role:         Role::System,
            content:      content.into(),
            tool_calls:   None,
            tool_call_id: None,
            name:         None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role:         Role::User,
            content:      content.into(),
            tool_calls:   None,
            tool_call_id: None,
            name:         None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role:         Role::Assistant,
            content:      content.into(),
            tool_calls:   None,
            tool_call_id: None,
            name:         None,
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role:         Role::Assistant,
            content:      content.into(),
            tool_calls:   Some(tool_calls),
            tool_call_id: None,
            name:         None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role:         Role::Tool,
            content:      content.into(),
            tool_calls:   None,
            tool_call_id: Some(tool_call_id.into()),
            name:         Some(tool_name.into()),
        }
    }

    /// True for assistant messages that carry at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant
            && self.tool_calls.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
    }
}

/// Tool schema for sending to the LLM (OpenAI / Anthropic tool format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name:        String,
    pub description: String,
    pub parameters:  serde_json::Value, // JSON Schema object
}
