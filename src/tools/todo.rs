//! Task-list tool over the shared dependency graph.
//!
//! The LLM manages tasks through this tool; the orchestrator reads the
//! same graph for batched execution. Rebuilding the list with a cycle in
//! `depends_on` is rejected before anything runs.

use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::graph::{Task, TaskGraph, TaskStatus};
use crate::tools::{Tool, ToolArgs, ToolResult};

pub struct TodoTool {
    graph: Arc<RwLock<TaskGraph>>,
}

impl TodoTool {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            graph: Arc::new(RwLock::new(TaskGraph::with_working_dir(
                working_dir.as_ref().to_path_buf(),
            ))),
        }
    }

    /// Share an existing graph (the orchestrator wires itself to the same
    /// one).
    pub fn with_graph(graph: Arc<RwLock<TaskGraph>>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> Arc<RwLock<TaskGraph>> {
        Arc::clone(&self.graph)
    }

    fn rebuild(&self, todos: &[serde_json::Value]) -> ToolResult {
        let working_dir = self.graph.read().unwrap().working_dir().to_path_buf();
        let mut graph = TaskGraph::with_working_dir(working_dir);

        for (i, raw) in todos.iter().enumerate() {
            let mut value = raw.clone();
            let obj = match value.as_object_mut() {
                Some(o) => o,
                None => return ToolResult::fail(format!("Todo #{} is not an object", i)),
            };
            // Auto-generate ID if not provided
            let has_id = obj.get("id").and_then(|v| v.as_str()).map(|s| !s.is_empty());
            if has_id != Some(true) {
                obj.insert("id".to_string(), json!(format!("task_{}", i)));
            }
            if obj.get("created_at").is_none() {
                obj.insert("created_at".to_string(), json!(chrono::Utc::now()));
            }

            let task: Task = match serde_json::from_value(value) {
                Ok(t) => t,
                Err(e) => return ToolResult::fail(format!("Invalid todo #{}: {}", i, e)),
            };
            graph.add(task);
        }

        let cycles = graph.detect_cycles();
        if let Some(cycle) = cycles.first() {
            return ToolResult::fail(format!(
                "Circular dependency detected: {}",
                cycle.join(" -> ")
            ));
        }

        let output = format_graph(&graph);
        let metadata = json!({
            "ready_tasks": graph.ready().iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
            "blocked_tasks": graph.blocked().iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
        });

        *self.graph.write().unwrap() = graph;

        ToolResult::ok(json!({ "display": output, "graph": metadata }))
    }

    fn query(&self, query: &str) -> ToolResult {
        let graph = self.graph.read().unwrap();
        match query {
            "ready_tasks" => {
                let ready = graph.ready();
                if ready.is_empty() {
                    return ToolResult::ok("No tasks ready (check dependencies)");
                }
                let mut lines = vec!["## Ready Tasks (can execute now)".to_string()];
                for t in ready {
                    lines.push(format!("- [{}] {}", t.id, t.content));
                    let inputs = graph.results_for(&t.id);
                    if !inputs.is_empty() {
                        lines.push(format!(
                            "  Available inputs: {:?}",
                            inputs.keys().collect::<Vec<_>>()
                        ));
                    }
                }
                ToolResult::ok(lines.join("\n"))
            }
            "blocked_tasks" => {
                let blocked = graph.blocked();
                if blocked.is_empty() {
                    return ToolResult::ok("No blocked tasks");
                }
                let mut lines = vec!["## Blocked Tasks (waiting on dependencies)".to_string()];
                for t in blocked {
                    let waiting: Vec<&String> = t
                        .depends_on
                        .iter()
                        .filter(|d| {
                            graph.get(d).map(|x| x.status != TaskStatus::Completed).unwrap_or(true)
                        })
                        .collect();
                    lines.push(format!("- [{}] {}", t.id, t.content));
                    lines.push(format!("  Waiting on: {:?}", waiting));
                }
                ToolResult::ok(lines.join("\n"))
            }
            "execution_order" => {
                let batches = graph.execution_order();
                let mut lines = vec!["## Execution Order (parallel batches)".to_string()];
                for (i, batch) in batches.iter().enumerate() {
                    let hint = if batch.len() > 1 { " (parallel)" } else { "" };
                    lines.push(format!("**Batch {}**{}:", i + 1, hint));
                    for t in batch {
                        lines.push(format!("  {} [{}] {}", t.status.symbol(), t.id, t.content));
                    }
                }
                ToolResult::ok(lines.join("\n"))
            }
            "results" => {
                let mut lines = vec!["## Task Results".to_string()];
                for t in graph.all() {
                    if let Some(result) = &t.result {
                        let key = t.result_key.clone().unwrap_or_else(|| t.id.clone());
                        let mut preview = result.to_string();
                        if preview.len() > 100 {
                            preview.truncate(100);
                            preview.push_str("...");
                        }
                        lines.push(format!("**{}** (from {}): {}", key, t.id, preview));
                    }
                }
                if lines.len() == 1 {
                    return ToolResult::ok("No results yet");
                }
                ToolResult::ok(lines.join("\n"))
            }
            other => ToolResult::fail(format!("Unknown query: {}", other)),
        }
    }
}

fn format_graph(graph: &TaskGraph) -> String {
    if graph.is_empty() {
        return "No tasks in list.".to_string();
    }

    let mut lines = vec!["━━━ Task List ━━━".to_string()];
    for batch in graph.execution_order() {
        for task in &batch {
            lines.push(format!("  {} [{}] {}", task.status.symbol(), task.id, task.content));
            if !task.depends_on.is_empty() {
                lines.push(format!("     ↳ depends on: {}", task.depends_on.join(", ")));
            }
        }
    }

    let completed =
        graph.all().iter().filter(|t| t.status == TaskStatus::Completed).count();
    lines.push(format!(
        "Progress: {}/{} done │ {} ready │ {} blocked",
        completed,
        graph.len(),
        graph.ready().len(),
        graph.blocked().len()
    ));
    lines.join("\n")
}

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        "todo"
    }

    fn description(&self) -> &str {
        "Manage the task list with dependency tracking and result passing. \
         Pass a `todos` array to replace the list (ids auto-generated, \
         depends_on builds chains, result_key names outputs for dependents), \
         or a `query` (ready_tasks, blocked_tasks, execution_order, results)."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "blocked", "failed"]
                            },
                            "task_type": {
                                "type": "string",
                                "enum": ["research", "code", "validate", "review", "general"]
                            },
                            "depends_on": { "type": "array", "items": { "type": "string" } },
                            "result_key": { "type": "string" },
                            "priority": { "type": "string", "enum": ["high", "medium", "low"] },
                            "can_parallel": { "type": "boolean" },
                            "produces": {
                                "type": "string",
                                "description": "Artifact claim: 'file:<path>[:<type>[:<rows>]]', 'data', or 'metrics'"
                            },
                            "target": {
                                "type": "object",
                                "properties": {
                                    "metric": { "type": "string" },
                                    "operator": { "type": "string", "enum": [">=", "<=", ">", "<", "==", "!="] },
                                    "value": { "type": "number" }
                                }
                            }
                        },
                        "required": ["content", "status"]
                    }
                },
                "query": {
                    "type": "string",
                    "enum": ["ready_tasks", "blocked_tasks", "execution_order", "results"]
                }
            }
        })
    }

    async fn execute(&self, args: &ToolArgs) -> ToolResult {
        if let Some(query) = args.get("query").and_then(|v| v.as_str()) {
            return self.query(query);
        }
        if let Some(todos) = args.get("todos").and_then(|v| v.as_array()) {
            return self.rebuild(todos);
        }
        let graph = self.graph.read().unwrap();
        ToolResult::ok(format_graph(&graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_rebuild_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TodoTool::new(dir.path());

        let mut args = HashMap::new();
        args.insert(
            "todos".to_string(),
            json!([
                {"id": "a", "content": "first", "status": "pending", "result_key": "r"},
                {"id": "b", "content": "second", "status": "pending", "depends_on": ["a"]},
            ]),
        );
        let r = tool.execute(&args).await;
        assert!(r.success, "{:?}", r.error);

        let mut q = HashMap::new();
        q.insert("query".to_string(), json!("ready_tasks"));
        let r = tool.execute(&q).await;
        assert!(r.to_message().contains("[a]"));
        assert!(!r.to_message().contains("[b]"));
    }

    #[tokio::test]
    async fn test_cycle_rejected_at_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TodoTool::new(dir.path());

        let mut args = HashMap::new();
        args.insert(
            "todos".to_string(),
            json!([
                {"id": "a", "content": "a", "status": "pending", "depends_on": ["b"]},
                {"id": "b", "content": "b", "status": "pending", "depends_on": ["a"]},
            ]),
        );
        let r = tool.execute(&args).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("Circular dependency"));
    }
}
