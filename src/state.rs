//! Session state: todo list, snapshot contract, and persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::context::ContextWindow;
use crate::error::EngineError;
use crate::types::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TodoStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
}

impl TodoStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "☐",
            TodoStatus::InProgress => "◐",
            TodoStatus::Done => "☑",
            TodoStatus::Failed => "☒",
        }
    }
}

/// A single todo item in the agent's local task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub description: String,
    pub status:      TodoStatus,
    pub created_at:  DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TodoItem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description:  description.into(),
            status:       TodoStatus::Pending,
            created_at:   Utc::now(),
            completed_at: None,
        }
    }

    pub fn mark_done(&mut self) {
        self.status = TodoStatus::Done;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self) {
        self.status = TodoStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_in_progress(&mut self) {
        self.status = TodoStatus::InProgress;
    }
}

impl std::fmt::Display for TodoItem {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.status.symbol(), self.description)
    }
}

/// The agent's local task list, synced from the todo tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoList {
    pub items: Vec<TodoItem>,
}

impl TodoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, description: impl Into<String>) {
        self.items.push(TodoItem::new(description));
    }

    pub fn incomplete(&self) -> Vec<&TodoItem> {
        self.items.iter().filter(|i| i.status != TodoStatus::Done).collect()
    }

    /// Sync from the todo tool's task array. The tool speaks lowercase
    /// status strings; graph-only statuses map onto the nearest local one.
    pub fn sync_from_tool(&mut self, todos: &[serde_json::Value]) {
        self.items = todos
            .iter()
            .map(|t| {
                let description =
                    t.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let status = match t.get("status").and_then(|v| v.as_str()).unwrap_or("pending") {
                    "in_progress" => TodoStatus::InProgress,
                    "completed" => TodoStatus::Done,
                    "failed" => TodoStatus::Failed,
                    _ => TodoStatus::Pending,
                };
                let mut item = TodoItem::new(description);
                item.status = status;
                if status == TodoStatus::Done {
                    item.completed_at = Some(Utc::now());
                }
                item
            })
            .collect();
    }

    pub fn to_display(&self) -> String {
        if self.items.is_empty() {
            return "No todos defined.".to_string();
        }
        let mut lines = vec!["Current Tasks:".to_string()];
        for (i, item) in self.items.iter().enumerate() {
            lines.push(format!("  {}. {}", i, item));
        }
        lines.join("\n")
    }
}

/// Complete state of an agent session: the JSON snapshot contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id:    String,
    pub system_prompt: String,
    pub messages:      Vec<Message>,
    pub todos:         TodoList,
    pub working_dir:   String,
    pub model:         String,
    pub temperature:   f64,
    pub max_iterations: usize,
    #[serde(default)]
    pub metadata:      HashMap<String, serde_json::Value>,
    pub created_at:    DateTime<Utc>,
    pub updated_at:    DateTime<Utc>,
}

impl SessionState {
    pub fn new(
        session_id: impl Into<String>,
        system_prompt: impl Into<String>,
        working_dir: impl Into<String>,
        model: impl Into<String>,
        temperature: f64,
        max_iterations: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id:     session_id.into(),
            system_prompt:  system_prompt.into(),
            messages:       Vec::new(),
            todos:          TodoList::new(),
            working_dir:    working_dir.into(),
            model:          model.into(),
            temperature,
            max_iterations,
            metadata:       HashMap::new(),
            created_at:     now,
            updated_at:     now,
        }
    }

    /// Capture the context window into the snapshot.
    pub fn capture(&mut self, context: &ContextWindow) {
        self.system_prompt = context.system_prompt().to_string();
        self.messages = context.messages().to_vec();
        self.updated_at = Utc::now();
    }

    /// Rebuild a context window from the snapshot.
    pub fn restore_context(&self) -> ContextWindow {
        ContextWindow::from_messages(self.system_prompt.clone(), self.messages.clone())
    }
}

/// A row in the sessions listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub task_count: usize,
}

/// File-backed session persistence: one JSON file per session under a
/// state directory.
#[derive(Debug, Clone)]
pub struct StateManager {
    state_dir: PathBuf,
}

impl StateManager {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        let state_dir = state_dir.as_ref().to_path_buf();
        let _ = std::fs::create_dir_all(&state_dir);
        Self { state_dir }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", session_id))
    }

    pub fn save(&self, state: &SessionState) -> Result<(), EngineError> {
        let mut state = state.clone();
        state.updated_at = Utc::now();
        let data = serde_json::to_string_pretty(&state)?;
        std::fs::write(self.session_path(&state.session_id), data)?;
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<Option<SessionState>, EngineError> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    pub fn delete(&self, session_id: &str) -> Result<(), EngineError> {
        let path = self.session_path(session_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// All saved sessions, newest update first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, EngineError> {
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.state_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read_to_string(entry.path())?;
            if let Ok(state) = serde_json::from_str::<SessionState>(&data) {
                sessions.push(SessionSummary {
                    session_id: state.session_id,
                    created_at: state.created_at,
                    updated_at: state.updated_at,
                    task_count: state.todos.items.len(),
                });
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Snapshot the current state under a timestamped checkpoint id.
    pub fn create_checkpoint(&self, state: &SessionState) -> Result<String, EngineError> {
        let checkpoint_id = format!(
            "{}_checkpoint_{}",
            state.session_id,
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let mut copy = state.clone();
        copy.session_id = checkpoint_id.clone();
        let data = serde_json::to_string_pretty(&copy)?;
        std::fs::write(self.session_path(&checkpoint_id), data)?;
        Ok(checkpoint_id)
    }
}

/// Unique session id: sha256 over timestamp + task, first 12 hex chars.
pub fn generate_session_id(task: &str) -> String {
    let content = format!("{}:{}", Utc::now().to_rfc3339(), task);
    let digest = Sha256::digest(content.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let id = generate_session_id("do things");
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path());

        let mut state =
            SessionState::new("abc123def456", "sys", "/tmp/w", "claude-sonnet", 0.0, 120);
        state.todos.add("first task");
        manager.save(&state).unwrap();

        let loaded = manager.load("abc123def456").unwrap().unwrap();
        assert_eq!(loaded.session_id, "abc123def456");
        assert_eq!(loaded.todos.items.len(), 1);
        assert_eq!(loaded.max_iterations, 120);

        let sessions = manager.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].task_count, 1);

        manager.delete("abc123def456").unwrap();
        assert!(manager.load("abc123def456").unwrap().is_none());
    }

    #[test]
    fn test_todo_sync_from_tool() {
        let mut todos = TodoList::new();
        let raw = vec![
            serde_json::json!({"content": "a", "status": "completed"}),
            serde_json::json!({"content": "b", "status": "in_progress"}),
            serde_json::json!({"content": "c", "status": "pending"}),
        ];
        todos.sync_from_tool(&raw);
        assert_eq!(todos.items.len(), 3);
        assert_eq!(todos.items[0].status, TodoStatus::Done);
        assert!(todos.items[0].completed_at.is_some());
        assert_eq!(todos.incomplete().len(), 2);
    }
}
