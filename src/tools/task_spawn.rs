//! Delegate a task to a sub-executor.
//!
//! Registered only on top-level agents; sub-executors have this tool
//! removed before they start, so delegation never recurses.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::subagent::SubAgentOrchestrator;
use crate::tools::{Tool, ToolArgs, ToolResult};

pub struct TaskSpawnTool {
    orchestrator: Arc<SubAgentOrchestrator>,
}

impl TaskSpawnTool {
    pub fn new(orchestrator: Arc<SubAgentOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Tool for TaskSpawnTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Delegate a task to an isolated sub-executor. Profiles: explore \
         (fast read-only search), debug (error investigation), research \
         (web research), plan (task breakdown), general (complex \
         multi-step), reviewer (work review)."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "Which executor profile to use"
                },
                "task": {
                    "type": "string",
                    "description": "The task for the sub-executor"
                }
            },
            "required": ["agent_name", "task"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> ToolResult {
        let Some(agent_name) = args.get("agent_name").and_then(|v| v.as_str()) else {
            return ToolResult::fail("task requires 'agent_name'");
        };
        let Some(task) = args.get("task").and_then(|v| v.as_str()) else {
            return ToolResult::fail("task requires 'task'");
        };

        let result = self.orchestrator.spawn(agent_name, task).await;

        if result.success {
            ToolResult::ok(format!(
                "[{} finished in {} iterations, {:.1}s]\n\n{}",
                result.agent_name, result.iterations, result.duration_seconds, result.output
            ))
        } else {
            ToolResult::fail(result.error.unwrap_or_else(|| "sub-executor failed".to_string()))
        }
    }
}
