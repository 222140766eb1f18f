//! Dependency graph of typed tasks.
//!
//! Tasks form a DAG; cycles are rejected before execution. A task
//! completes only after every dependency has completed, and a completed
//! task's result is published to the registry under its `result_key` for
//! injection into dependents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::artifact::{validate_file_content, ArtifactSpec, RowSpec, Target};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "☐",
            TaskStatus::InProgress => "◐",
            TaskStatus::Completed => "☑",
            TaskStatus::Blocked => "⊘",
            TaskStatus::Failed => "✗",
        }
    }
}

/// Classifier for gates and executor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Research,
    Code,
    Validate,
    Review,
    #[default]
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Research => "research",
            TaskType::Code => "code",
            TaskType::Validate => "validate",
            TaskType::Review => "review",
            TaskType::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// A node in the task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id:         String,
    pub content:    String,
    pub status:     TaskStatus,
    #[serde(default)]
    pub task_type:  TaskType,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result:     Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    #[serde(default)]
    pub priority:   Priority,
    #[serde(default = "default_true")]
    pub can_parallel: bool,
    /// Artifact this task claims to produce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produces:   Option<String>,
    /// Numeric success criterion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target:     Option<Target>,
    /// Force LLM verification for this task.
    #[serde(default)]
    pub verify:     bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error:      Option<String>,
}

fn default_true() -> bool {
    true
}

impl Task {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id:           id.into(),
            content:      content.into(),
            status:       TaskStatus::Pending,
            task_type:    TaskType::General,
            depends_on:   Vec::new(),
            result:       None,
            result_key:   None,
            priority:     Priority::Medium,
            can_parallel: true,
            produces:     None,
            target:       None,
            verify:       false,
            created_at:   Utc::now(),
            completed_at: None,
            error:        None,
        }
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_depends_on(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    pub fn with_result_key(mut self, key: impl Into<String>) -> Self {
        self.result_key = Some(key.into());
        self
    }

    pub fn with_produces(mut self, produces: impl Into<String>) -> Self {
        self.produces = Some(produces.into());
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.can_parallel = false;
        self
    }
}

/// The dependency graph plus the result registry.
#[derive(Debug, Default)]
pub struct TaskGraph {
    /// Insertion-ordered task list; ids are unique.
    tasks:       Vec<Task>,
    /// result_key -> result mapping.
    results:     HashMap<String, serde_json::Value>,
    /// Base for resolving relative artifact paths.
    working_dir: PathBuf,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self { tasks: Vec::new(), results: HashMap::new(), working_dir: PathBuf::from(".") }
    }

    pub fn with_working_dir(working_dir: impl Into<PathBuf>) -> Self {
        Self { tasks: Vec::new(), results: HashMap::new(), working_dir: working_dir.into() }
    }

    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = dir.into();
    }

    pub fn working_dir(&self) -> &std::path::Path {
        &self.working_dir
    }

    /// Add a task, replacing any existing task with the same id.
    pub fn add(&mut self, task: Task) {
        if let (Some(result), Some(key)) = (&task.result, &task.result_key) {
            self.results.insert(key.clone(), result.clone());
        }
        if let Some(pos) = self.tasks.iter().position(|t| t.id == task.id) {
            self.tasks[pos] = task;
        } else {
            self.tasks.push(task);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Apply a mutation to a task. Returns false for unknown ids. The
    /// result registry picks up a completed result with a key.
    pub fn update<F: FnOnce(&mut Task)>(&mut self, id: &str, f: F) -> bool {
        let Some(task) = self.get_mut(id) else {
            return false;
        };
        f(task);
        let publish = match (task.status, &task.result, &task.result_key) {
            (TaskStatus::Completed, Some(result), Some(key)) => {
                Some((key.clone(), result.clone()))
            }
            _ => None,
        };
        if let Some((key, result)) = publish {
            self.results.insert(key, result);
        }
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        before != self.tasks.len()
    }

    pub fn all(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn result(&self, key: &str) -> Option<&serde_json::Value> {
        self.results.get(key)
    }

    pub fn results(&self) -> &HashMap<String, serde_json::Value> {
        &self.results
    }

    /// Results from a task's dependencies, keyed by each dependency's
    /// `result_key` (falling back to its id). A snapshot: later writes to
    /// the registry do not affect it.
    pub fn results_for(&self, task_id: &str) -> HashMap<String, serde_json::Value> {
        let mut out = HashMap::new();
        let Some(task) = self.get(task_id) else {
            return out;
        };
        for dep_id in &task.depends_on {
            if let Some(dep) = self.get(dep_id) {
                if let Some(result) = &dep.result {
                    let key = dep.result_key.clone().unwrap_or_else(|| dep_id.clone());
                    out.insert(key, result.clone());
                }
            }
        }
        out
    }

    pub fn dependencies_met(&self, task_id: &str) -> bool {
        let Some(task) = self.get(task_id) else {
            return false;
        };
        task.depends_on.iter().all(|dep_id| {
            self.get(dep_id).map(|d| d.status == TaskStatus::Completed).unwrap_or(false)
        })
    }

    /// Pending tasks whose dependencies are all completed, highest
    /// priority first.
    pub fn ready(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && self.dependencies_met(&t.id))
            .collect();
        ready.sort_by_key(|t| t.priority.rank());
        ready
    }

    /// Pending tasks still waiting on incomplete dependencies.
    pub fn blocked(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && !self.dependencies_met(&t.id))
            .collect()
    }

    /// Subset of ready tasks hinted as parallelizable.
    pub fn parallel_batch(&self) -> Vec<&Task> {
        self.ready().into_iter().filter(|t| t.can_parallel).collect()
    }

    /// Kahn-style topological batching: each batch is the set of tasks
    /// with no remaining in-edges. Stops early if a cycle keeps every
    /// remaining task's in-degree above zero.
    pub fn execution_order(&self) -> Vec<Vec<Task>> {
        let mut in_degree: HashMap<&str, usize> =
            self.tasks.iter().map(|t| (t.id.as_str(), 0)).collect();
        for task in &self.tasks {
            let known_deps =
                task.depends_on.iter().filter(|d| in_degree.contains_key(d.as_str())).count();
            *in_degree.get_mut(task.id.as_str()).unwrap() = known_deps;
        }

        let mut batches = Vec::new();
        let mut remaining: Vec<&Task> = self.tasks.iter().collect();

        while !remaining.is_empty() {
            let batch_ids: Vec<String> = remaining
                .iter()
                .filter(|t| in_degree[t.id.as_str()] == 0)
                .map(|t| t.id.clone())
                .collect();

            if batch_ids.is_empty() {
                // Circular dependency; callers reject before running.
                break;
            }

            let batch: Vec<Task> = remaining
                .iter()
                .filter(|t| batch_ids.contains(&t.id))
                .map(|t| (*t).clone())
                .collect();

            remaining.retain(|t| !batch_ids.contains(&t.id));
            for task in &remaining {
                let dropped = task.depends_on.iter().filter(|d| batch_ids.contains(d)).count();
                if let Some(deg) = in_degree.get_mut(task.id.as_str()) {
                    *deg = deg.saturating_sub(dropped);
                }
            }

            batches.push(batch);
        }

        batches
    }

    /// DFS cycle detection. Each cycle is reported as a path ending where
    /// it started, e.g. `["A", "B", "A"]`.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited: Vec<String> = Vec::new();

        fn dfs(
            graph: &TaskGraph,
            node: &str,
            path: &mut Vec<String>,
            visited: &mut Vec<String>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            visited.push(node.to_string());
            path.push(node.to_string());

            if let Some(task) = graph.get(node) {
                for dep in &task.depends_on {
                    if let Some(pos) = path.iter().position(|p| p == dep) {
                        let mut cycle: Vec<String> = path[pos..].to_vec();
                        cycle.push(dep.clone());
                        cycles.push(cycle);
                    } else if !visited.contains(dep) {
                        dfs(graph, dep, path, visited, cycles);
                    }
                }
            }

            path.pop();
        }

        for task in &self.tasks {
            if !visited.contains(&task.id) {
                let mut path = Vec::new();
                dfs(self, &task.id, &mut path, &mut visited, &mut cycles);
            }
        }

        cycles
    }

    /// Reject graphs with cycles or unknown dependencies.
    pub fn validate(&self) -> Result<(), EngineError> {
        for task in &self.tasks {
            for dep in &task.depends_on {
                if self.get(dep).is_none() {
                    return Err(EngineError::UnknownDependency {
                        task: task.id.clone(),
                        dep:  dep.clone(),
                    });
                }
            }
        }
        let cycles = self.detect_cycles();
        if let Some(cycle) = cycles.first() {
            return Err(EngineError::CycleDetected(cycle.join(" -> ")));
        }
        Ok(())
    }

    pub fn mark_in_progress(&mut self, task_id: &str) -> bool {
        if let Some(task) = self.get_mut(task_id) {
            task.status = TaskStatus::InProgress;
            true
        } else {
            false
        }
    }

    /// Record a task outcome.
    ///
    /// On error the task fails. Otherwise the artifact claim and target
    /// criterion are validated; any failure marks the task failed with a
    /// descriptive message and dependents stay blocked. On success the
    /// result is stored and published under the task's `result_key`.
    pub fn set_task_result(
        &mut self,
        task_id: &str,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<(), String> {
        let working_dir = self.working_dir.clone();
        let Some(task) = self.get_mut(task_id) else {
            return Err(format!("Task {} not found", task_id));
        };

        if let Some(err) = error {
            task.status = TaskStatus::Failed;
            task.error = Some(err);
            return Ok(());
        }

        if let Some(produces) = task.produces.clone() {
            if let Err(msg) = validate_artifact(&produces, result.as_ref(), &working_dir) {
                task.status = TaskStatus::Failed;
                task.error = Some(msg.clone());
                return Err(msg);
            }
        }

        if let (Some(target), Some(result)) = (&task.target, result.as_ref()) {
            if let Err(msg) = target.check(result) {
                task.status = TaskStatus::Failed;
                task.error = Some(msg.clone());
                return Err(msg);
            }
        } else if let Some(target) = &task.target {
            let msg = format!("Target metric '{}' not found in result", target.metric);
            task.status = TaskStatus::Failed;
            task.error = Some(msg.clone());
            return Err(msg);
        }

        task.status = TaskStatus::Completed;
        task.result = result.clone();
        task.completed_at = Some(Utc::now());
        let key = task.result_key.clone();

        if let (Some(key), Some(result)) = (key, result) {
            self.results.insert(key, result);
        }
        Ok(())
    }
}

fn validate_artifact(
    produces: &str,
    result: Option<&serde_json::Value>,
    working_dir: &std::path::Path,
) -> Result<(), String> {
    match ArtifactSpec::parse(produces) {
        ArtifactSpec::File { path, file_type, rows } => {
            let resolved = if path.is_absolute() { path } else { working_dir.join(path) };
            let (expected_rows, min_rows) = match rows {
                Some(RowSpec::Exact(n)) => (Some(n), None),
                Some(RowSpec::Min(n)) => (None, Some(n)),
                None => (None, None),
            };
            validate_file_content(&resolved, file_type.as_deref(), expected_rows, min_rows, None)
                .map(|_| ())
                .map_err(|e| {
                    format!("Artifact validation failed for '{}': {}", produces, e)
                })
        }
        ArtifactSpec::Data | ArtifactSpec::Metrics => {
            if result.is_none() || result == Some(&serde_json::Value::Null) {
                Err(format!("Task declared produces='{}' but result is null", produces))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain() -> TaskGraph {
        let mut g = TaskGraph::new();
        g.add(Task::new("a", "first").with_result_key("r_a"));
        g.add(Task::new("b", "second").with_depends_on(vec!["a".to_string()]));
        g
    }

    #[test]
    fn test_ready_and_blocked() {
        let g = chain();
        assert_eq!(g.ready().len(), 1);
        assert_eq!(g.ready()[0].id, "a");
        assert_eq!(g.blocked().len(), 1);
        assert_eq!(g.blocked()[0].id, "b");
    }

    #[test]
    fn test_result_propagation() {
        let mut g = chain();
        g.set_task_result("a", Some(json!({"x": 1})), None).unwrap();
        assert_eq!(g.get("a").unwrap().status, TaskStatus::Completed);

        let inputs = g.results_for("b");
        assert_eq!(inputs.get("r_a"), Some(&json!({"x": 1})));
        assert_eq!(g.ready()[0].id, "b");
    }

    #[test]
    fn test_cycle_detection() {
        let mut g = TaskGraph::new();
        g.add(Task::new("a", "a").with_depends_on(vec!["b".to_string()]));
        g.add(Task::new("b", "b").with_depends_on(vec!["a".to_string()]));

        let cycles = g.detect_cycles();
        assert!(!cycles.is_empty());
        let err = g.validate().unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected(_)));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut g = TaskGraph::new();
        g.add(Task::new("a", "a").with_depends_on(vec!["ghost".to_string()]));
        assert!(matches!(g.validate(), Err(EngineError::UnknownDependency { .. })));
    }

    #[test]
    fn test_execution_order_batches() {
        let mut g = TaskGraph::new();
        g.add(Task::new("r1", "research 1"));
        g.add(Task::new("r2", "research 2"));
        g.add(Task::new("d", "design").with_depends_on(vec!["r1".to_string(), "r2".to_string()]));
        g.add(Task::new("i", "implement").with_depends_on(vec!["d".to_string()]));

        let batches = g.execution_order();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1][0].id, "d");
        assert_eq!(batches[2][0].id, "i");

        // every task appears in exactly one batch
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_failed_validation_blocks_dependents() {
        let mut g = chain();
        let err = {
            let t = g.get_mut("a").unwrap();
            t.produces = Some("file:/nonexistent/path.csv".to_string());
            g.set_task_result("a", Some(json!("done")), None).unwrap_err()
        };
        assert!(err.contains("Artifact validation failed"));
        assert_eq!(g.get("a").unwrap().status, TaskStatus::Failed);
        assert!(g.ready().is_empty());
        assert_eq!(g.blocked().len(), 1);
    }

    #[test]
    fn test_target_enforced_on_completion() {
        let mut g = TaskGraph::new();
        g.add(Task::new("m", "measure").with_target(Target {
            metric:   "coverage".to_string(),
            operator: crate::artifact::Operator::Ge,
            value:    6.0,
        }));

        let err = g.set_task_result("m", Some(json!({"coverage": 4.2})), None).unwrap_err();
        assert!(err.contains("Target not met"));
        assert_eq!(g.get("m").unwrap().status, TaskStatus::Failed);
    }
}
