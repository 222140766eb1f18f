//! Artifact claims and success criteria attached to tasks.
//!
//! The `produces` grammar: `file:<path>[:<type>[:<rows>|<rows>+]]`,
//! `data`, or `metrics`. Anything else is treated as a bare file path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSpec {
    Exact(usize),
    Min(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSpec {
    File { path: PathBuf, file_type: Option<String>, rows: Option<RowSpec> },
    Data,
    Metrics,
}

impl ArtifactSpec {
    /// Parse a `produces` declaration.
    pub fn parse(produces: &str) -> Self {
        match produces {
            "data" => return ArtifactSpec::Data,
            "metrics" => return ArtifactSpec::Metrics,
            _ => {}
        }

        if let Some(rest) = produces.strip_prefix("file:") {
            let mut parts = rest.splitn(3, ':');
            let path = PathBuf::from(parts.next().unwrap_or_default());
            let file_type = parts.next().filter(|t| !t.is_empty()).map(|t| t.to_string());
            let rows = parts.next().and_then(parse_row_spec);
            return ArtifactSpec::File { path, file_type, rows };
        }

        ArtifactSpec::File { path: PathBuf::from(produces), file_type: None, rows: None }
    }
}

fn parse_row_spec(spec: &str) -> Option<RowSpec> {
    if let Some(min) = spec.strip_suffix('+') {
        return min.parse().ok().map(RowSpec::Min);
    }
    spec.parse().ok().map(RowSpec::Exact)
}

/// Metadata gathered while validating a file's content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows:       Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns:    Option<Vec<String>>,
}

/// Validate a file against an expected content type and constraints.
///
/// CSV files are parsed for a header and data-row count; JSON files must
/// parse; other types only need to exist and be non-empty.
pub fn validate_file_content(
    path: &Path,
    expected_type: Option<&str>,
    expected_rows: Option<usize>,
    min_rows: Option<usize>,
    required_columns: Option<&[String]>,
) -> Result<FileMetadata, String> {
    if !path.exists() {
        return Err(format!("File does not exist: {}", path.display()));
    }
    let size_bytes = std::fs::metadata(path).map_err(|e| e.to_string())?.len();
    if size_bytes == 0 {
        return Err(format!("File is empty: {}", path.display()));
    }

    let mut metadata = FileMetadata { size_bytes, ..Default::default() };

    let lowered = expected_type.map(|t| t.to_lowercase());
    match lowered.as_deref() {
        Some("csv") | Some("tsv") => {
            let sep = if lowered.as_deref() == Some("tsv") { '\t' } else { ',' };
            let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
            let mut lines = raw.lines().filter(|l| !l.trim().is_empty());

            let header = lines.next().ok_or_else(|| "CSV has no header row".to_string())?;
            let columns: Vec<String> =
                header.split(sep).map(|c| c.trim().trim_matches('"').to_string()).collect();
            let data_rows = lines.count();

            if let Some(required) = required_columns {
                let missing: Vec<&String> =
                    required.iter().filter(|c| !columns.contains(c)).collect();
                if !missing.is_empty() {
                    return Err(format!("CSV missing required columns: {:?}", missing));
                }
            }
            if let Some(expected) = expected_rows {
                if data_rows != expected {
                    return Err(format!(
                        "CSV row count mismatch: expected {}, found {}",
                        expected, data_rows
                    ));
                }
            }
            if let Some(min) = min_rows {
                if data_rows < min {
                    return Err(format!(
                        "CSV has too few rows: expected at least {}, found {}",
                        min, data_rows
                    ));
                }
            }

            metadata.rows = Some(data_rows);
            metadata.columns = Some(columns);
        }
        Some("json") => {
            let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
            let value: serde_json::Value =
                serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON: {}", e))?;
            if let Some(arr) = value.as_array() {
                metadata.rows = Some(arr.len());
                if let Some(expected) = expected_rows {
                    if arr.len() != expected {
                        return Err(format!(
                            "JSON array length mismatch: expected {}, found {}",
                            expected,
                            arr.len()
                        ));
                    }
                }
                if let Some(min) = min_rows {
                    if arr.len() < min {
                        return Err(format!(
                            "JSON array too short: expected at least {}, found {}",
                            min,
                            arr.len()
                        ));
                    }
                }
            }
        }
        _ => {}
    }

    Ok(metadata)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    pub fn compare(&self, actual: f64, target: f64) -> bool {
        match self {
            Operator::Ge => actual >= target,
            Operator::Le => actual <= target,
            Operator::Gt => actual > target,
            Operator::Lt => actual < target,
            Operator::Eq => actual == target,
            Operator::Ne => actual != target,
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        };
        write!(f, "{}", s)
    }
}

/// Numeric success criterion attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub metric:   String,
    pub operator: Operator,
    pub value:    f64,
}

impl Target {
    /// Check a task result against the target. The metric is either the
    /// raw numeric result or a key into a result object.
    pub fn check(&self, result: &serde_json::Value) -> Result<(), String> {
        let actual = if let Some(n) = result.as_f64() {
            Some(n)
        } else {
            result.get(&self.metric).and_then(|v| v.as_f64())
        };

        let Some(actual) = actual else {
            return Err(format!("Target metric '{}' not found in result", self.metric));
        };

        if !self.operator.compare(actual, self.value) {
            return Err(format!(
                "Target not met: {}={} (required {} {})",
                self.metric, actual, self.operator, self.value
            ));
        }
        Ok(())
    }
}
