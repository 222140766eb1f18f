//! File-pattern and content-regex search.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::tools::{Tool, ToolArgs, ToolResult};

const MAX_RESULTS: usize = 200;
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__", ".venv", "_logs"];

pub struct SearchTool {
    working_dir: PathBuf,
}

impl SearchTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self { working_dir: working_dir.into() }
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if !SKIP_DIRS.contains(&name.as_str()) {
                    self.walk(&path, out);
                }
            } else {
                out.push(path);
            }
            if out.len() > 50_000 {
                return;
            }
        }
    }

    /// Glob-lite matching: `*` matches within a path segment, `**` spans
    /// segments.
    fn glob_matches(pattern: &str, path: &str) -> bool {
        let regex_str = format!(
            "^{}$",
            regex::escape(pattern)
                .replace(r"\*\*/", "(.*/)?")
                .replace(r"\*\*", ".*")
                .replace(r"\*", "[^/]*")
                .replace(r"\?", "[^/]")
        );
        Regex::new(&regex_str).map(|re| re.is_match(path)).unwrap_or(false)
    }

    fn find_files(&self, pattern: &str) -> ToolResult {
        let mut all = Vec::new();
        self.walk(&self.working_dir, &mut all);

        let matches: Vec<String> = all
            .iter()
            .filter_map(|p| p.strip_prefix(&self.working_dir).ok())
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| Self::glob_matches(pattern, p))
            .take(MAX_RESULTS)
            .collect();

        if matches.is_empty() {
            ToolResult::ok(format!("No files matching '{}'", pattern))
        } else {
            ToolResult::ok(matches.join("\n"))
        }
    }

    fn grep(&self, pattern: &str, file_pattern: Option<&str>) -> ToolResult {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => return ToolResult::fail(format!("Invalid regex '{}': {}", pattern, e)),
        };

        let mut all = Vec::new();
        self.walk(&self.working_dir, &mut all);

        let mut hits = Vec::new();
        'files: for path in &all {
            let rel = match path.strip_prefix(&self.working_dir) {
                Ok(r) => r.to_string_lossy().to_string(),
                Err(_) => continue,
            };
            if let Some(fp) = file_pattern {
                if !Self::glob_matches(fp, &rel) {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(path) else {
                continue; // binary or unreadable
            };
            for (lineno, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    hits.push(format!("{}:{}: {}", rel, lineno + 1, line.trim()));
                    if hits.len() >= MAX_RESULTS {
                        break 'files;
                    }
                }
            }
        }

        if hits.is_empty() {
            ToolResult::ok(format!("No matches for /{}/", pattern))
        } else {
            ToolResult::ok(hits.join("\n"))
        }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Find files by glob pattern or search file contents by regex. \
         Commands: files(pattern), grep(pattern, file_pattern?)."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["files", "grep"],
                    "description": "files = glob over paths, grep = regex over contents"
                },
                "pattern": { "type": "string", "description": "Glob or regex pattern" },
                "file_pattern": {
                    "type": "string",
                    "description": "Optional glob restricting which files grep reads"
                }
            },
            "required": ["command", "pattern"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> ToolResult {
        let command = args.get("command").and_then(|v| v.as_str()).unwrap_or_default();
        let pattern = args.get("pattern").and_then(|v| v.as_str()).unwrap_or_default();
        let file_pattern = args.get("file_pattern").and_then(|v| v.as_str());

        match command {
            "files" => self.find_files(pattern),
            "grep" => self.grep(pattern, file_pattern),
            other => ToolResult::fail(format!("Unknown command: '{}'", other)),
        }
    }
}
