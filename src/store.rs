use async_trait::async_trait;
use std::collections::HashMap;

use crate::state::SessionState;

/// Pluggable persistence for session snapshots.
///
/// The JSON file layout of [`StateManager`](crate::state::StateManager)
/// is the default; this trait exists for callers that want sessions in
/// memory (tests) or SQLite (long-lived installations).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Save or overwrite a session snapshot.
    async fn save(&self, state: SessionState) -> Result<(), String>;

    /// Load a session by id.
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, String>;

    /// List all stored session ids.
    async fn list_sessions(&self) -> Result<Vec<String>, String>;

    /// Remove a session.
    async fn delete(&self, session_id: &str) -> Result<(), String>;
}

/// A simple in-memory store for testing and short-lived sessions.
pub struct MemorySessionStore {
    sessions: std::sync::Mutex<HashMap<String, SessionState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self { sessions: std::sync::Mutex::new(HashMap::new()) }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, state: SessionState) -> Result<(), String> {
        let mut store = self.sessions.lock().unwrap();
        store.insert(state.session_id.clone(), state);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, String> {
        let store = self.sessions.lock().unwrap();
        Ok(store.get(session_id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<String>, String> {
        let store = self.sessions.lock().unwrap();
        Ok(store.keys().cloned().collect())
    }

    async fn delete(&self, session_id: &str) -> Result<(), String> {
        let mut store = self.sessions.lock().unwrap();
        store.remove(session_id);
        Ok(())
    }
}

/// A store that saves each session to a separate JSON file in a directory.
pub struct FileSessionStore {
    base_path: std::path::PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        let path = path.into();
        let _ = std::fs::create_dir_all(&path);
        Self { base_path: path }
    }

    fn session_path(&self, session_id: &str) -> std::path::PathBuf {
        self.base_path.join(format!("{}.json", session_id))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, state: SessionState) -> Result<(), String> {
        let data = serde_json::to_string_pretty(&state).map_err(|e| e.to_string())?;
        std::fs::write(self.session_path(&state.session_id), data).map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, String> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
        serde_json::from_str(&data).map(Some).map_err(|e| e.to_string())
    }

    async fn list_sessions(&self) -> Result<Vec<String>, String> {
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.base_path).map_err(|e| e.to_string())? {
            let entry = entry.map_err(|e| e.to_string())?;
            if let Some(stem) = entry.path().file_stem() {
                sessions.push(stem.to_string_lossy().to_string());
            }
        }
        Ok(sessions)
    }

    async fn delete(&self, session_id: &str) -> Result<(), String> {
        let path = self.session_path(session_id);
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// A store that keeps session snapshots in a SQLite database.
pub struct SqliteSessionStore {
    path: std::path::PathBuf,
}

impl SqliteSessionStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let conn = rusqlite::Connection::open(&path).map_err(|e| e.to_string())?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                snapshot   TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| e.to_string())?;
        Ok(Self { path })
    }

    fn get_conn(&self) -> Result<rusqlite::Connection, String> {
        rusqlite::Connection::open(&self.path).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save(&self, state: SessionState) -> Result<(), String> {
        let conn = self.get_conn()?;
        let snapshot = serde_json::to_string(&state).map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO sessions (session_id, snapshot, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET snapshot = ?2, updated_at = ?3",
            rusqlite::params![state.session_id, snapshot, state.updated_at.to_rfc3339()],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, String> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare("SELECT snapshot FROM sessions WHERE session_id = ?1")
            .map_err(|e| e.to_string())?;

        let mut rows = stmt.query(rusqlite::params![session_id]).map_err(|e| e.to_string())?;
        if let Some(row) = rows.next().map_err(|e| e.to_string())? {
            let snapshot: String = row.get(0).map_err(|e| e.to_string())?;
            serde_json::from_str(&snapshot).map(Some).map_err(|e| e.to_string())
        } else {
            Ok(None)
        }
    }

    async fn list_sessions(&self) -> Result<Vec<String>, String> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare("SELECT session_id FROM sessions ORDER BY updated_at DESC")
            .map_err(|e| e.to_string())?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(|e| e.to_string())?;
        let mut sessions = Vec::new();
        for session in rows {
            sessions.push(session.map_err(|e| e.to_string())?);
        }
        Ok(sessions)
    }

    async fn delete(&self, session_id: &str) -> Result<(), String> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM sessions WHERE session_id = ?1", rusqlite::params![session_id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: &str) -> SessionState {
        SessionState::new(id, "sys", ".", "claude-sonnet", 0.0, 120)
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemorySessionStore::new();
        store.save(state("s1")).await.unwrap();
        assert!(store.load("s1").await.unwrap().is_some());
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);
        store.delete("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::new(dir.path().join("sessions.db")).unwrap();

        let mut s = state("s2");
        store.save(s.clone()).await.unwrap();
        s.todos.add("new item");
        store.save(s).await.unwrap();

        let loaded = store.load("s2").await.unwrap().unwrap();
        assert_eq!(loaded.todos.items.len(), 1);
        assert_eq!(store.list_sessions().await.unwrap(), vec!["s2".to_string()]);
    }
}
