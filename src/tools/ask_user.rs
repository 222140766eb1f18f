//! Ask the user for a decision.
//!
//! The tool itself never touches the terminal: it returns a payload
//! flagged `awaiting_user_input`, and the agent loop prompts the user and
//! substitutes their literal answer as the tool result.

use async_trait::async_trait;
use serde_json::json;

use crate::tools::{Tool, ToolArgs, ToolResult};

pub struct AskUserTool;

impl AskUserTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AskUserTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user a question when a decision or clarification is needed. \
         Use sparingly; prefer making reasonable assumptions."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "The question to ask" },
                "options": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional list of choices"
                },
                "context": { "type": "string", "description": "Why this is being asked" },
                "default": { "type": "string", "description": "Default answer" }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> ToolResult {
        let Some(question) = args.get("question").and_then(|v| v.as_str()) else {
            return ToolResult::fail("ask_user requires 'question'");
        };

        ToolResult::ok(json!({
            "awaiting_user_input": true,
            "question": question,
            "options": args.get("options").cloned().unwrap_or(serde_json::Value::Null),
            "context": args.get("context").cloned().unwrap_or(serde_json::Value::Null),
            "default": args.get("default").cloned().unwrap_or(serde_json::Value::Null),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_sentinel_payload() {
        let tool = AskUserTool::new();
        let mut args = HashMap::new();
        args.insert("question".to_string(), json!("Proceed?"));
        let result = tool.execute(&args).await;
        assert!(result.success);
        assert!(result.awaiting_user_input());
    }
}
