//! The uniform tool invocation surface.
//!
//! All tools satisfy one trait: name, description, JSON-schema
//! parameters, execute. The registry never panics: unknown tools, empty
//! argument maps, and missing required arguments all come back as
//! failure results the LLM can read.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::types::ToolSchema;

mod ask_user;
mod file_ops;
mod search;
mod shell;
mod skill;
mod task_spawn;
mod todo;
mod web;

pub use ask_user::AskUserTool;
pub use file_ops::FileOpsTool;
pub use search::SearchTool;
pub use shell::ShellTool;
pub use skill::SkillTool;
pub use task_spawn::TaskSpawnTool;
pub use todo::TodoTool;
pub use web::WebTool;

pub type ToolArgs = HashMap<String, serde_json::Value>;

/// Normalized result of a tool execution, irrespective of tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output:  serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:   Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<serde_json::Value>) -> Self {
        Self { success: true, output: output.into(), error: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, output: serde_json::Value::Null, error: Some(error.into()) }
    }

    /// Format for LLM consumption.
    pub fn to_message(&self) -> String {
        if self.success {
            match &self.output {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => serde_json::to_string_pretty(other).unwrap_or_default(),
            }
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown"))
        }
    }

    /// True when the tool is handing control back to the terminal for a
    /// user answer (the ask_user sentinel).
    pub fn awaiting_user_input(&self) -> bool {
        self.output
            .get("awaiting_user_input")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// A side-effecting capability exposed to the LLM.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments.
    fn parameters(&self) -> serde_json::Value;

    async fn execute(&self, args: &ToolArgs) -> ToolResult;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name:        self.name().to_string(),
            description: self.description().to_string(),
            parameters:  self.parameters(),
        }
    }
}

/// Central registry for tools. Read-only after construction.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }

    pub fn unregister(&mut self, name: &str) {
        self.tools.remove(name);
        self.order.retain(|n| n != name);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// All tool schemas, the tools array for LLM calls.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order.iter().filter_map(|n| self.tools.get(n)).map(|t| t.schema()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Keep only the named tools. Unknown names are ignored.
    pub fn filtered(&self, allowed: &[String]) -> ToolRegistry {
        let mut out = ToolRegistry::new();
        for name in &self.order {
            if allowed.iter().any(|a| a == name) {
                if let Some(tool) = self.tools.get(name) {
                    out.register(Arc::clone(tool));
                }
            }
        }
        out
    }

    /// Execute a named tool. Never panics; every failure mode becomes a
    /// failure result:
    /// - unknown tool name
    /// - empty argument map (a symptom of LLM output truncation)
    /// - missing required arguments per the tool's schema
    pub async fn execute(&self, name: &str, args: &ToolArgs) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::fail(format!(
                "Tool '{}' not found. Available: {:?}",
                name,
                self.list_names()
            ));
        };

        if args.is_empty() {
            return ToolResult::fail(format!(
                "Tool '{}' called with no arguments. This may indicate response truncation.",
                name
            ));
        }

        if let Some(missing) = missing_required_args(&tool.parameters(), args) {
            return ToolResult::fail(format!(
                "Tool '{}' argument error: missing required {:?}. Received args: {:?}",
                name,
                missing,
                args.keys().collect::<Vec<_>>()
            ));
        }

        tool.execute(args).await
    }
}

fn missing_required_args(schema: &serde_json::Value, args: &ToolArgs) -> Option<Vec<String>> {
    let required = schema.get("required")?.as_array()?;
    let missing: Vec<String> = required
        .iter()
        .filter_map(|r| r.as_str())
        .filter(|r| !args.contains_key(*r))
        .map(|r| r.to_string())
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(missing)
    }
}

/// Construct the atomic tool set rooted at a working directory:
/// shell, file_ops, search, web, todo, ask_user, and (when a skill set is
/// given) skill.
pub fn build_registry(working_dir: impl AsRef<Path>) -> ToolRegistry {
    build_registry_with_skills(working_dir, None)
}

pub fn build_registry_with_skills(
    working_dir: impl AsRef<Path>,
    skills: Option<Arc<crate::skills::SkillSet>>,
) -> ToolRegistry {
    let working_dir = working_dir.as_ref().to_path_buf();
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(ShellTool::new(&working_dir)));
    registry.register(Arc::new(FileOpsTool::new(&working_dir)));
    registry.register(Arc::new(SearchTool::new(&working_dir)));
    registry.register(Arc::new(WebTool::new(&working_dir)));
    registry.register(Arc::new(TodoTool::new(&working_dir)));
    registry.register(Arc::new(AskUserTool::new()));

    if let Some(skills) = skills {
        if !skills.is_empty() {
            registry.register(Arc::new(SkillTool::new(skills)));
        }
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: &ToolArgs) -> ToolResult {
            ToolResult::ok(args.get("text").cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failure_not_panic() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nope", &HashMap::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_empty_args_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let result = registry.execute("echo", &HashMap::new()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no arguments"));
    }

    #[tokio::test]
    async fn test_missing_required_arg_reports_received() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let mut args = HashMap::new();
        args.insert("wrong".to_string(), json!("x"));
        let result = registry.execute("echo", &args).await;
        assert!(!result.success);
        let err = result.error.unwrap();
        assert!(err.contains("text"));
        assert!(err.contains("wrong"));
    }

    #[tokio::test]
    async fn test_filtered_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let filtered = registry.filtered(&["echo".to_string(), "ghost".to_string()]);
        assert_eq!(filtered.list_names(), vec!["echo"]);
    }
}
