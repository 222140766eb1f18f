//! Append-only evidence logs.
//!
//! Two line-delimited JSON logs live under the working directory's
//! `_logs/` folder: `fetch.log` (HTTP requests) and `exec.log` (shell
//! commands). They are written synchronously at tool completion and are
//! the only source the provenance checker trusts, never model output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const FETCH_LOG_FILE: &str = "fetch.log";
pub const EXEC_LOG_FILE: &str = "exec.log";

/// Commands that count as verification runs.
const VERIFICATION_PATTERNS: &[&str] = &[
    "pytest",
    "unittest",
    "npm test",
    "npm run test",
    "yarn test",
    "go test",
    "cargo test",
    "make test",
    "python -m unittest",
    "python3 -m unittest",
    "ctest",
    "jest",
    "mocha",
];

/// Substrings that flag an error in command output.
const ERROR_MARKERS: &[&str] = &[
    "error:",
    "error ",
    "exception",
    "traceback",
    "failed",
    "failure",
    "fatal",
    "panicked",
    "segmentation fault",
];

/// One logged HTTP fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchEntry {
    pub url:              String,
    pub final_url:        String,
    pub status_code:      u16,
    pub content_type:     String,
    pub content_length:   u64,
    pub success:          bool,
    pub is_html:          bool,
    pub is_error_page:    bool,
    #[serde(default)]
    pub error_indicators: Vec<String>,
    #[serde(default)]
    pub error:            Option<String>,
    pub timestamp:        DateTime<Utc>,
}

impl FetchEntry {
    /// Inspect fetched content for the error-page heuristics recorded in
    /// the log entry: HTML detection and common error-page markers.
    pub fn classify(mut self, body_head: &str) -> Self {
        let lower = body_head.to_lowercase();
        if !self.is_html {
            self.is_html = self.content_type.to_lowercase().contains("html")
                || lower.contains("<html")
                || lower.contains("<!doctype html");
        }

        let markers = [
            "404",
            "not found",
            "access denied",
            "forbidden",
            "page does not exist",
            "error occurred",
        ];
        for m in markers {
            if lower.contains(m) {
                self.error_indicators.push(m.to_string());
            }
        }
        // Only title/body markers make an error page, not a bare status line
        self.is_error_page = !self.error_indicators.is_empty()
            && (lower.contains("<title") || self.is_html);
        self
    }
}

/// One logged shell execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecEntry {
    pub command:          String,
    pub exit_code:        i32,
    pub success:          bool,
    pub timeout:          bool,
    pub is_verification:  bool,
    #[serde(default)]
    pub error_indicators: Vec<String>,
    #[serde(default)]
    pub stderr_head:      String,
    pub timestamp:        DateTime<Utc>,
}

impl ExecEntry {
    pub fn new(command: &str, exit_code: i32, timeout: bool, stderr: &str) -> Self {
        Self {
            command:          command.to_string(),
            exit_code,
            success:          exit_code == 0 && !timeout,
            timeout,
            is_verification:  is_verification_command(command),
            error_indicators: extract_error_indicators(stderr),
            stderr_head:      stderr.chars().take(500).collect(),
            timestamp:        Utc::now(),
        }
    }
}

/// True if the command looks like a test/verification run.
pub fn is_verification_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    VERIFICATION_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Pull error-looking lines out of command output, capped at 5.
pub fn extract_error_indicators(output: &str) -> Vec<String> {
    let mut found = Vec::new();
    for line in output.lines() {
        let lower = line.to_lowercase();
        if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
            found.push(line.trim().chars().take(200).collect());
            if found.len() >= 5 {
                break;
            }
        }
    }
    found
}

/// Append-only JSONL writer with queries over the fetch log.
#[derive(Debug)]
pub struct FetchLog {
    path:  PathBuf,
    write: Mutex<()>,
}

impl FetchLog {
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        Self {
            path:  log_dir.as_ref().join(FETCH_LOG_FILE),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &FetchEntry) -> std::io::Result<()> {
        append_line(&self.path, &self.write, entry)
    }

    /// Most recent entry matching the URL exactly, or matching after the
    /// redirect target (`final_url`).
    pub fn find_fetch_for_url(&self, url: &str) -> Option<FetchEntry> {
        self.entries()
            .into_iter()
            .rev()
            .find(|e| e.url == url || e.final_url == url)
    }

    /// Last `n` entries in insertion order. `n == 0` means all.
    pub fn recent_fetches(&self, n: usize) -> Vec<FetchEntry> {
        let entries = self.entries();
        if n == 0 || n >= entries.len() {
            return entries;
        }
        entries[entries.len() - n..].to_vec()
    }

    fn entries(&self) -> Vec<FetchEntry> {
        read_entries(&self.path)
    }
}

/// Append-only JSONL writer with queries over the exec log.
#[derive(Debug)]
pub struct ExecLog {
    path:  PathBuf,
    write: Mutex<()>,
}

impl ExecLog {
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        Self {
            path:  log_dir.as_ref().join(EXEC_LOG_FILE),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &ExecEntry) -> std::io::Result<()> {
        append_line(&self.path, &self.write, entry)
    }

    /// All entries whose command contains the substring, in insertion order.
    pub fn find_execution(&self, command_substring: &str) -> Vec<ExecEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.command.contains(command_substring))
            .collect()
    }

    /// Last `n` entries in insertion order. `n == 0` means all.
    pub fn recent_executions(&self, n: usize) -> Vec<ExecEntry> {
        let entries = self.entries();
        if n == 0 || n >= entries.len() {
            return entries;
        }
        entries[entries.len() - n..].to_vec()
    }

    /// Entries flagged as verification runs.
    pub fn verification_runs(&self) -> Vec<ExecEntry> {
        self.entries().into_iter().filter(|e| e.is_verification).collect()
    }

    fn entries(&self) -> Vec<ExecEntry> {
        read_entries(&self.path)
    }
}

fn append_line<T: Serialize>(path: &Path, guard: &Mutex<()>, entry: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(entry)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    // One write call per line under the mutex keeps appends line-atomic.
    let _lock = guard.lock().unwrap_or_else(|p| p.into_inner());
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}

fn read_entries<T: for<'de> Deserialize<'de>>(path: &Path) -> Vec<T> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}
