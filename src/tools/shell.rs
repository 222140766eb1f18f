//! Shell execution with smart timeout handling and output truncation.
//!
//! Verbose commands (installers, builds) get their output truncated and
//! saved to `_logs/`; every execution is appended to the exec evidence
//! log at completion.

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use crate::evidence::{ExecEntry, ExecLog};
use crate::tools::{Tool, ToolArgs, ToolResult};

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_LINES_FAILURE: usize = 40;
const MAX_LINES_NORMAL: usize = 200;

/// Commands that produce verbose output (install logs, build logs, etc.)
const VERBOSE_PATTERNS: &[&str] = &[
    "pip install",
    "pip3 install",
    "npm install",
    "npm ci",
    "yarn install",
    "yarn add",
    "pnpm install",
    "cargo build",
    "cargo install",
    "apt-get",
    "apt install",
    "brew install",
    "make",
    "cmake",
    "ninja",
    "docker build",
    "docker pull",
    "go build",
    "go get",
    "mvn",
    "gradle",
    "composer install",
    "bundle install",
];

pub struct ShellTool {
    working_dir: PathBuf,
    logs_dir:    PathBuf,
    exec_log:    ExecLog,
}

impl ShellTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        let logs_dir = working_dir.join("_logs");
        Self { exec_log: ExecLog::new(&logs_dir), working_dir, logs_dir }
    }

    fn is_verbose_command(command: &str) -> bool {
        let lower = command.to_lowercase();
        VERBOSE_PATTERNS.iter().any(|p| lower.contains(p))
    }

    fn adjust_timeout(command: &str, base: u64) -> u64 {
        let lower = command.to_lowercase();
        if ["install", "pip", "npm", "apt", "brew"].iter().any(|k| lower.contains(k)) {
            (base * 5).min(300)
        } else if ["git clone", "wget", "curl", "download"].iter().any(|k| lower.contains(k)) {
            (base * 3).min(180)
        } else if ["test", "pytest", "npm test"].iter().any(|k| lower.contains(k)) {
            (base * 5).min(300)
        } else if ["python", "python3"].iter().any(|k| lower.contains(k)) {
            (base * 5).min(600)
        } else {
            base
        }
    }

    fn log_path(&self, command: &str) -> PathBuf {
        let digest = Sha256::digest(command.as_bytes());
        let hash: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
        let short: String = command
            .chars()
            .take(30)
            .map(|c| if c == '/' || c == ' ' { '_' } else { c })
            .collect();
        self.logs_dir.join(format!("{}_{}.log", short, hash))
    }

    /// Truncate output to keep tool results small. Verbose successes get
    /// a summary, failures the tail, long normal output head+tail. The
    /// full text always lands in `_logs/` for the verbose cases.
    fn truncate_output(&self, output: &str, command: &str, success: bool) -> String {
        if output.is_empty() {
            return "(no output)".to_string();
        }

        let lines: Vec<&str> = output.trim().lines().collect();
        let total = lines.len();
        let verbose = Self::is_verbose_command(command);

        if verbose {
            let log_path = self.log_path(command);
            let _ = std::fs::create_dir_all(&self.logs_dir);
            let _ = std::fs::write(&log_path, output);

            if success {
                return format!(
                    "Completed ({} lines)\nLast output: {}\nFull log: {}",
                    total,
                    lines.last().unwrap_or(&""),
                    log_path.display()
                );
            }

            let tail_start = total.saturating_sub(MAX_LINES_FAILURE);
            let mut result = Vec::new();
            if tail_start > 0 {
                result.push(format!("... ({} lines omitted) ...", tail_start));
            }
            result.extend(lines[tail_start..].iter().map(|l| l.to_string()));
            result.push(format!("\nFull log: {}", log_path.display()));
            return result.join("\n");
        }

        if total > MAX_LINES_NORMAL {
            let head = lines[..20].join("\n");
            let tail = lines[total - 20..].join("\n");
            return format!("{}\n\n... ({} lines omitted) ...\n\n{}", head, total - 40, tail);
        }

        output.to_string()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute bash commands. Use for running scripts, installing packages, \
         executing Python, etc."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 120)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> ToolResult {
        let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::fail("No command provided. The 'command' argument is required.");
        };
        if command.trim().is_empty() {
            return ToolResult::fail("No command provided. The 'command' argument is required.");
        }

        let base_timeout =
            args.get("timeout").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_TIMEOUT_SECS);
        let timeout = Self::adjust_timeout(command, base_timeout);

        let child = tokio::process::Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let outcome = tokio::time::timeout(Duration::from_secs(timeout), child).await;

        match outcome {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code().unwrap_or(-1);
                let success = output.status.success();

                // Evidence first, synchronously, before the result is
                // visible to the model.
                let entry = ExecEntry::new(command, exit_code, false, &stderr);
                if let Err(e) = self.exec_log.append(&entry) {
                    tracing::warn!(error = %e, "failed to append exec log entry");
                }

                let mut combined = stdout;
                if !stderr.is_empty() {
                    if combined.is_empty() {
                        combined = stderr;
                    } else {
                        combined.push_str("\n[stderr]\n");
                        combined.push_str(&stderr);
                    }
                }

                let truncated = self.truncate_output(&combined, command, success);

                if success {
                    ToolResult::ok(truncated)
                } else {
                    ToolResult {
                        success: false,
                        output:  json!(truncated),
                        error:   Some(format!("Exit code: {}", exit_code)),
                    }
                }
            }
            Ok(Err(e)) => {
                let entry = ExecEntry::new(command, -1, false, &e.to_string());
                let _ = self.exec_log.append(&entry);
                ToolResult::fail(format!("Failed to spawn command: {}", e))
            }
            Err(_) => {
                let entry = ExecEntry::new(command, -1, true, "timed out");
                let _ = self.exec_log.append(&entry);
                ToolResult::fail(format!("Command timed out after {}s", timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_command_runs_and_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(dir.path());

        let mut args = HashMap::new();
        args.insert("command".to_string(), json!("echo hello"));
        let result = tool.execute(&args).await;

        assert!(result.success);
        assert!(result.to_message().contains("hello"));

        let log = ExecLog::new(dir.path().join("_logs"));
        let entries = log.recent_executions(0);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
    }

    #[tokio::test]
    async fn test_failing_command_records_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(dir.path());

        let mut args = HashMap::new();
        args.insert("command".to_string(), json!("exit 3"));
        let result = tool.execute(&args).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("3"));

        let log = ExecLog::new(dir.path().join("_logs"));
        assert!(!log.recent_executions(0)[0].success);
    }

    #[test]
    fn test_timeout_adjustment() {
        assert_eq!(ShellTool::adjust_timeout("pip install numpy", 120), 300);
        assert_eq!(ShellTool::adjust_timeout("ls", 120), 120);
    }
}
