//! External validation of data-acquisition and execution claims.
//!
//! Verdicts come from the evidence logs and the filesystem only, never
//! from model output. Category identifiers are stable across the crate.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::artifact::validate_file_content;
use crate::evidence::{ExecLog, FetchLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single provenance issue detected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceIssue {
    pub severity: Severity,
    pub category: String,
    pub message:  String,
    #[serde(default)]
    pub evidence: serde_json::Value,
}

impl std::fmt::Display for ProvenanceIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.category, self.message)
    }
}

/// Result of a provenance verification. `valid` is true iff no
/// error-severity issues were recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceResult {
    pub valid:    bool,
    pub issues:   Vec<ProvenanceIssue>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ProvenanceResult {
    pub fn new() -> Self {
        Self { valid: true, issues: Vec::new(), metadata: HashMap::new() }
    }

    pub fn add_issue(
        &mut self,
        severity: Severity,
        category: &str,
        message: impl Into<String>,
        evidence: serde_json::Value,
    ) {
        if severity == Severity::Error {
            self.valid = false;
        }
        self.issues.push(ProvenanceIssue {
            severity,
            category: category.to_string(),
            message: message.into(),
            evidence,
        });
    }

    pub fn errors(&self) -> Vec<&ProvenanceIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error).collect()
    }

    pub fn warnings(&self) -> Vec<&ProvenanceIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning).collect()
    }
}

impl Default for ProvenanceResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters for a data-acquisition check.
#[derive(Debug, Clone, Default)]
pub struct DataAcquisitionClaim {
    pub url:              Option<String>,
    pub file:             Option<PathBuf>,
    pub expected_type:    Option<String>,
    pub expected_rows:    Option<usize>,
    pub min_rows:         Option<usize>,
    pub required_columns: Option<Vec<String>>,
}

/// Summary over the whole exec log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total:                 usize,
    pub succeeded:             usize,
    pub failed:                usize,
    pub timeouts:              usize,
    pub verification_commands: usize,
}

/// Verifies claims against the append-only evidence logs and the
/// filesystem. The checker holds the only handles the gates read from.
pub struct ProvenanceChecker {
    fetch_log:   FetchLog,
    exec_log:    ExecLog,
    working_dir: PathBuf,
}

impl ProvenanceChecker {
    pub fn new(log_dir: impl AsRef<Path>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetch_log:   FetchLog::new(log_dir.as_ref()),
            exec_log:    ExecLog::new(log_dir.as_ref()),
            working_dir: working_dir.into(),
        }
    }

    pub fn fetch_log(&self) -> &FetchLog {
        &self.fetch_log
    }

    pub fn exec_log(&self) -> &ExecLog {
        &self.exec_log
    }

    /// Verify a data acquisition claim: the fetch record, the local file
    /// content, and the cross-reference between the two.
    pub fn verify_data_acquisition(&self, claim: &DataAcquisitionClaim) -> ProvenanceResult {
        let mut result = ProvenanceResult::new();
        result
            .metadata
            .insert("timestamp".to_string(), serde_json::json!(Utc::now().to_rfc3339()));
        if let Some(url) = &claim.url {
            result.metadata.insert("claimed_url".to_string(), serde_json::json!(url));
        }

        if let Some(url) = &claim.url {
            self.verify_fetch(url, &mut result);
        }

        if let Some(file) = &claim.file {
            let resolved = self.resolve(file);
            self.verify_file(&resolved, claim, &mut result);

            if let Some(url) = &claim.url {
                if resolved.exists() {
                    self.cross_reference(url, &resolved, &mut result);
                }
            }
        }

        result
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    fn verify_fetch(&self, url: &str, result: &mut ProvenanceResult) {
        let Some(entry) = self.fetch_log.find_fetch_for_url(url) else {
            result.add_issue(
                Severity::Error,
                "no_fetch_record",
                format!(
                    "No fetch record found for URL: {}. Claims to have downloaded data \
                     but no HTTP request was logged.",
                    url
                ),
                serde_json::json!({ "url": url }),
            );
            return;
        };

        let evidence = serde_json::to_value(&entry).unwrap_or_default();

        if !entry.success {
            result.add_issue(
                Severity::Error,
                "fetch_failed",
                format!("Fetch failed for URL: {}. Error: {:?}", url, entry.error),
                evidence,
            );
            return;
        }

        if entry.status_code >= 400 {
            result.add_issue(
                Severity::Error,
                "http_error",
                format!("HTTP error {} for URL: {}", entry.status_code, url),
                evidence,
            );
            return;
        }

        if entry.is_error_page {
            result.add_issue(
                Severity::Error,
                "error_page",
                format!(
                    "Fetched content appears to be an error page: {}. Indicators: {:?}",
                    url, entry.error_indicators
                ),
                evidence,
            );
            return;
        }

        // Sniffed HTML under a non-HTML content-type header is suspect,
        // whatever the caller expected.
        if entry.is_html && !entry.content_type.to_lowercase().contains("html") {
            result.add_issue(
                Severity::Warning,
                "unexpected_html",
                format!(
                    "Content appears to be HTML but content-type is '{}': {}",
                    entry.content_type, url
                ),
                evidence.clone(),
            );
        }

        result.metadata.insert("fetch_verified".to_string(), serde_json::json!(true));
        result.metadata.insert("fetch_entry".to_string(), evidence);
    }

    fn verify_file(
        &self,
        path: &Path,
        claim: &DataAcquisitionClaim,
        result: &mut ProvenanceResult,
    ) {
        if !path.exists() {
            result.add_issue(
                Severity::Error,
                "file_not_found",
                format!("Claimed output file does not exist: {}", path.display()),
                serde_json::json!({ "file_path": path.display().to_string() }),
            );
            return;
        }

        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            result.add_issue(
                Severity::Error,
                "empty_file",
                format!("Output file is empty: {}", path.display()),
                serde_json::json!({ "file_path": path.display().to_string(), "size": 0 }),
            );
            return;
        }

        match validate_file_content(
            path,
            claim.expected_type.as_deref(),
            claim.expected_rows,
            claim.min_rows,
            claim.required_columns.as_deref(),
        ) {
            Ok(metadata) => {
                result.metadata.insert("file_verified".to_string(), serde_json::json!(true));
                result.metadata.insert(
                    "file_metadata".to_string(),
                    serde_json::to_value(metadata).unwrap_or_default(),
                );
            }
            Err(msg) => {
                result.add_issue(
                    Severity::Error,
                    "invalid_content",
                    format!("File content validation failed: {}", msg),
                    serde_json::json!({ "file_path": path.display().to_string() }),
                );
            }
        }
    }

    /// Compare fetch content length against file size; a ratio outside
    /// [0.1, 10] suggests the file did not come from the fetch.
    fn cross_reference(&self, url: &str, path: &Path, result: &mut ProvenanceResult) {
        let Some(entry) = self.fetch_log.find_fetch_for_url(url) else {
            return; // already flagged by verify_fetch
        };

        let fetch_length = entry.content_length;
        let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        if fetch_length > 0 && file_size > 0 {
            let ratio = file_size as f64 / fetch_length as f64;
            if !(0.1..=10.0).contains(&ratio) {
                result.add_issue(
                    Severity::Warning,
                    "size_mismatch",
                    format!(
                        "File size ({}) differs significantly from fetched content ({})",
                        file_size, fetch_length
                    ),
                    serde_json::json!({
                        "url": url,
                        "file_path": path.display().to_string(),
                        "fetch_length": fetch_length,
                        "file_size": file_size,
                        "ratio": ratio,
                    }),
                );
            }
        }
    }

    /// Verify that a command actually ran (and succeeded).
    pub fn verify_execution(
        &self,
        command_substring: &str,
        must_have_run: bool,
        must_have_succeeded: bool,
    ) -> ProvenanceResult {
        let mut result = ProvenanceResult::new();
        result
            .metadata
            .insert("claimed_command".to_string(), serde_json::json!(command_substring));

        let executions = self.exec_log.find_execution(command_substring);

        let Some(latest) = executions.last() else {
            if must_have_run {
                result.add_issue(
                    Severity::Error,
                    "no_execution_record",
                    format!(
                        "No execution record found for: {}. Claims to have run command \
                         but no execution was logged.",
                        command_substring
                    ),
                    serde_json::json!({ "claimed_command": command_substring }),
                );
            }
            return result;
        };

        let evidence = serde_json::to_value(latest).unwrap_or_default();
        result.metadata.insert("execution_entry".to_string(), evidence.clone());

        if latest.timeout {
            result.add_issue(
                Severity::Error,
                "execution_timeout",
                format!("Command timed out: {}", command_substring),
                evidence,
            );
            return result;
        }

        if must_have_succeeded && !latest.success {
            result.add_issue(
                Severity::Error,
                "execution_failed",
                format!(
                    "Command execution failed (exit code: {}). Errors: {:?}",
                    latest.exit_code,
                    latest.error_indicators.iter().take(3).collect::<Vec<_>>()
                ),
                evidence,
            );
            return result;
        }

        result.metadata.insert("execution_verified".to_string(), serde_json::json!(true));
        result
    }

    /// Require at least one verification run; all-failed is an error,
    /// partially-failed a warning.
    pub fn verify_tests_ran(&self) -> ProvenanceResult {
        let mut result = ProvenanceResult::new();
        let runs = self.exec_log.verification_runs();

        if runs.is_empty() {
            result.add_issue(
                Severity::Error,
                "no_tests_run",
                "No test/verification commands found in execution log. Claims to have \
                 run tests but no test execution was logged.",
                serde_json::Value::Null,
            );
            return result;
        }

        let passed: Vec<_> = runs.iter().filter(|r| r.success).collect();
        let failed: Vec<_> = runs.iter().filter(|r| !r.success).collect();

        result.metadata.insert("total_test_runs".to_string(), serde_json::json!(runs.len()));
        result.metadata.insert("passed".to_string(), serde_json::json!(passed.len()));
        result.metadata.insert("failed".to_string(), serde_json::json!(failed.len()));

        if passed.is_empty() && !failed.is_empty() {
            result.add_issue(
                Severity::Error,
                "all_tests_failed",
                format!(
                    "All {} test runs failed. Latest failure: {:?}",
                    failed.len(),
                    failed.last().map(|r| r.error_indicators.clone()).unwrap_or_default()
                ),
                serde_json::Value::Null,
            );
        } else if !failed.is_empty() {
            result.add_issue(
                Severity::Warning,
                "some_tests_failed",
                format!("{} of {} test runs failed.", failed.len(), runs.len()),
                serde_json::json!({ "failed": failed.len(), "passed": passed.len() }),
            );
        }

        result
    }

    /// Counts over every logged execution.
    pub fn execution_summary(&self) -> ExecutionSummary {
        let executions = self.exec_log.recent_executions(0);
        ExecutionSummary {
            total:                 executions.len(),
            succeeded:             executions.iter().filter(|e| e.success).count(),
            failed:                executions.iter().filter(|e| !e.success && !e.timeout).count(),
            timeouts:              executions.iter().filter(|e| e.timeout).count(),
            verification_commands: executions.iter().filter(|e| e.is_verification).count(),
        }
    }

    /// Human-readable report over a set of per-task results.
    pub fn generate_report(&self, results: &HashMap<String, ProvenanceResult>) -> String {
        let mut lines = vec![
            "=".repeat(60),
            "PROVENANCE VERIFICATION REPORT".to_string(),
            format!("Generated: {}", Utc::now().to_rfc3339()),
            "=".repeat(60),
            String::new(),
        ];

        let valid = results.values().filter(|r| r.valid).count();
        lines.push(format!("Summary: {}/{} tasks verified", valid, results.len()));
        if valid < results.len() {
            lines.push(format!("{} task(s) have provenance issues", results.len() - valid));
        }
        lines.push(String::new());

        for (task_id, result) in results {
            let status = if result.valid { "ok" } else { "FAIL" };
            lines.push(format!("[{}] Task: {}", status, task_id));
            for issue in &result.issues {
                lines.push(format!("  - {}: {}", issue.category, issue.message));
            }
        }

        lines.push("=".repeat(60));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{ExecEntry, FetchEntry};
    use std::io::Write;

    fn checker(dir: &Path) -> ProvenanceChecker {
        ProvenanceChecker::new(dir.join("_logs"), dir)
    }

    fn logged_fetch(dir: &Path, url: &str, status: u16, success: bool) {
        let log = FetchLog::new(dir.join("_logs"));
        log.append(&FetchEntry {
            url:              url.to_string(),
            final_url:        url.to_string(),
            status_code:      status,
            content_type:     "text/csv".to_string(),
            content_length:   60,
            success,
            is_html:          false,
            is_error_page:    false,
            error_indicators: Vec::new(),
            error:            None,
            timestamp:        Utc::now(),
        })
        .unwrap();
    }

    #[test]
    fn test_missing_fetch_record_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = checker(dir.path()).verify_data_acquisition(&DataAcquisitionClaim {
            url: Some("https://example.org/x.csv".to_string()),
            ..Default::default()
        });
        assert!(!result.valid);
        assert_eq!(result.errors()[0].category, "no_fetch_record");
    }

    #[test]
    fn test_http_error_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        logged_fetch(dir.path(), "https://example.org/x.csv", 404, true);

        let result = checker(dir.path()).verify_data_acquisition(&DataAcquisitionClaim {
            url: Some("https://example.org/x.csv".to_string()),
            ..Default::default()
        });
        assert!(!result.valid);
        assert_eq!(result.errors()[0].category, "http_error");
    }

    #[test]
    fn test_successful_acquisition_with_file() {
        let dir = tempfile::tempdir().unwrap();
        logged_fetch(dir.path(), "https://example.org/x.csv", 200, true);

        let file = dir.path().join("x.csv");
        let mut f = std::fs::File::create(&file).unwrap();
        writeln!(f, "a,b").unwrap();
        writeln!(f, "1,2").unwrap();

        let result = checker(dir.path()).verify_data_acquisition(&DataAcquisitionClaim {
            url:           Some("https://example.org/x.csv".to_string()),
            file:          Some(PathBuf::from("x.csv")),
            expected_type: Some("csv".to_string()),
            expected_rows: Some(1),
            ..Default::default()
        });
        assert!(result.valid, "issues: {:?}", result.issues);
        assert_eq!(result.metadata.get("fetch_verified"), Some(&serde_json::json!(true)));
        assert_eq!(result.metadata.get("file_verified"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn test_unexpected_html_keys_off_declared_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let log = FetchLog::new(dir.path().join("_logs"));

        let mut entry = FetchEntry {
            url:              "https://example.org/data.csv".to_string(),
            final_url:        "https://example.org/data.csv".to_string(),
            status_code:      200,
            content_type:     "text/csv".to_string(),
            content_length:   60,
            success:          true,
            is_html:          true, // sniffed as HTML despite the header
            is_error_page:    false,
            error_indicators: Vec::new(),
            error:            None,
            timestamp:        Utc::now(),
        };
        log.append(&entry).unwrap();

        let result = checker(dir.path()).verify_data_acquisition(&DataAcquisitionClaim {
            url: Some("https://example.org/data.csv".to_string()),
            ..Default::default()
        });
        assert!(result.valid, "warning only, not an error");
        assert_eq!(result.warnings()[0].category, "unexpected_html");

        // Declared HTML that sniffs as HTML is consistent: no warning.
        entry.url = "https://example.org/page".to_string();
        entry.final_url = entry.url.clone();
        entry.content_type = "text/html; charset=utf-8".to_string();
        log.append(&entry).unwrap();

        let result = checker(dir.path()).verify_data_acquisition(&DataAcquisitionClaim {
            url: Some("https://example.org/page".to_string()),
            ..Default::default()
        });
        assert!(result.valid);
        assert!(result.warnings().is_empty());
    }

    #[test]
    fn test_verify_execution_and_tests() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ExecLog::new(dir.path().join("_logs"));
        exec.append(&ExecEntry::new("python sim.py", 0, false, "")).unwrap();
        exec.append(&ExecEntry::new("pytest tests/", 0, false, "")).unwrap();

        let c = checker(dir.path());

        assert!(c.verify_execution("sim.py", true, true).valid);
        let missing = c.verify_execution("never_ran.sh", true, true);
        assert_eq!(missing.errors()[0].category, "no_execution_record");

        assert!(c.verify_tests_ran().valid);
        let summary = c.execution_summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.verification_commands, 1);
    }

    #[test]
    fn test_all_tests_failed() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ExecLog::new(dir.path().join("_logs"));
        exec.append(&ExecEntry::new("cargo test", 1, false, "error: test failed")).unwrap();

        let result = checker(dir.path()).verify_tests_ran();
        assert!(!result.valid);
        assert_eq!(result.errors()[0].category, "all_tests_failed");
    }
}
