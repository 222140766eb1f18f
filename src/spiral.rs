//! Debugging-spiral detection.
//!
//! Error strings are normalized into canonical signatures; a counter per
//! signature drives a three-stage escalation: inline fix recipe, then a
//! suggestion to delegate to the debug sub-executor, then an instruction
//! to ask the user.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Ordered signature table: first match wins.
const PATTERNS: &[(&str, &str)] = &[
    (r"timeout|timed?\s*out", "TIMEOUT"),
    (r"importerror|modulenotfound|cannot find module|module not found", "IMPORT_ERROR"),
    (r"typeerror|type error|mismatched types", "TYPE_ERROR"),
    (r"json.*serial|not json serial|circular|stringify", "JSON_ERROR"),
    (r"syntaxerror|syntax error|unexpected token|parsing error", "SYNTAX_ERROR"),
    (r"filenotfound|enoent|no such file|path.*not found", "FILE_NOT_FOUND"),
    (r"permission denied|eacces|access denied", "PERMISSION_ERROR"),
    (r"out of memory|memoryerror|heap|allocation failed", "MEMORY_ERROR"),
    (r"connection refused|econnrefused|network|socket|fetch failed", "NETWORK_ERROR"),
    (r"keyerror|attributeerror|undefined is not|cannot read propert", "KEY_ERROR"),
    (r"indexerror|out of bounds|index out of range", "INDEX_ERROR"),
    (r"nonetype|null pointer|cannot read.*null|undefined", "NULL_ERROR"),
    (r"build failed|compilation failed|compile error", "BUILD_ERROR"),
    (r"test failed|assertion.*failed|expect.*received", "TEST_FAILURE"),
];

fn compiled_patterns() -> &'static Vec<(Regex, &'static str)> {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PATTERNS
            .iter()
            .map(|(pat, sig)| (Regex::new(pat).expect("static pattern"), *sig))
            .collect()
    })
}

fn normalizers() -> &'static (Regex, Regex, Regex, Regex) {
    static NORMALIZERS: OnceLock<(Regex, Regex, Regex, Regex)> = OnceLock::new();
    NORMALIZERS.get_or_init(|| {
        (
            Regex::new(r"line \d+").expect("static pattern"),
            Regex::new(r"'[^']*'").expect("static pattern"),
            Regex::new(r#""[^"]*""#).expect("static pattern"),
            Regex::new(r"\d+").expect("static pattern"),
        )
    })
}

/// Canonical signature for an error string: normalized, then matched
/// against the ordered pattern table, with a stable hash fallback.
pub fn error_signature(error: &str) -> String {
    let (line_re, squote_re, dquote_re, digit_re) = normalizers();

    let mut err = error.to_lowercase();
    err = line_re.replace_all(&err, "line N").to_string();
    err = squote_re.replace_all(&err, "'X'").to_string();
    err = dquote_re.replace_all(&err, "\"X\"").to_string();
    err = digit_re.replace_all(&err, "N").to_string();

    for (re, sig) in compiled_patterns() {
        if re.is_match(&err) {
            return sig.to_string();
        }
    }

    let head: String = err.chars().take(100).collect();
    let digest = Sha256::digest(head.as_bytes());
    let n = u16::from_be_bytes([digest[0], digest[1]]) % 10000;
    format!("UNKNOWN_{}", n)
}

/// Extract a `_logs/...` path from error output if present.
pub fn extract_log_path(error_output: &str) -> Option<String> {
    static LOG_RE: OnceLock<Regex> = OnceLock::new();
    let re = LOG_RE.get_or_init(|| Regex::new(r"_logs/[^\s\]]+\.log").expect("static pattern"));
    re.find(error_output).map(|m| m.as_str().to_string())
}

/// What the loop should inject after a repeated error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpiralAction {
    /// First occurrence: inline fix recipe.
    InlineFix { signature: String, recipe: String },
    /// Second occurrence: delegate to the debug sub-executor.
    SuggestDebugAgent { signature: String, log_ref: String, error_preview: String },
    /// Third occurrence: ask the user; the counter resets.
    AskUser { signature: String, count: u32 },
}

impl SpiralAction {
    /// Render the action as the user message the loop injects.
    pub fn to_message(&self) -> String {
        match self {
            SpiralAction::InlineFix { signature, recipe } => format!(
                "[SYSTEM] Error detected: {}\n\nSuggested fixes:\n{}\n\n\
                 Apply one of these fixes and retry.",
                signature, recipe
            ),
            SpiralAction::SuggestDebugAgent { signature, log_ref, error_preview } => format!(
                "[SYSTEM] Same error occurred again: {}\n\n\
                 The previous fix didn't work. Use the debug agent to investigate:\n\
                 task(agent_name=\"debug\", task=\"Read {} and find root cause of: {}\")",
                signature, log_ref, error_preview
            ),
            SpiralAction::AskUser { signature, count } => format!(
                "[SYSTEM] DEBUGGING SPIRAL DETECTED\n\n\
                 Error '{}' has occurred {} times.\n\n\
                 Please ask the user for guidance using the ask_user tool.",
                signature, count
            ),
        }
    }
}

/// Tracks repeated error signatures across loop iterations.
#[derive(Debug, Default)]
pub struct SpiralDetector {
    counts:  HashMap<String, u32>,
    recipes: HashMap<String, String>,
}

impl SpiralDetector {
    pub fn new() -> Self {
        Self { counts: HashMap::new(), recipes: default_recipes() }
    }

    /// Replace the fix recipes wholesale. The mapping must cover every
    /// signature the caller cares about; unknown signatures fall back to
    /// a generic recipe.
    pub fn with_recipes(mut self, recipes: HashMap<String, String>) -> Self {
        self.recipes = recipes;
        self
    }

    pub fn recipe_for(&self, signature: &str) -> String {
        self.recipes.get(signature).cloned().unwrap_or_else(|| {
            "Error occurred. Try:\n\
             1. Read the full error message carefully\n\
             2. Search for the error message online\n\
             3. Simplify the code to isolate the issue\n\
             4. Try an alternative approach"
                .to_string()
        })
    }

    /// Record an error occurrence and decide the escalation stage.
    pub fn observe(&mut self, error: &str) -> SpiralAction {
        let signature = error_signature(error);
        let count = self.counts.entry(signature.clone()).or_insert(0);
        *count += 1;
        let count = *count;

        if count == 1 {
            SpiralAction::InlineFix { recipe: self.recipe_for(&signature), signature }
        } else if count == 2 {
            let log_ref = extract_log_path(error).unwrap_or_else(|| "_logs/".to_string());
            let error_preview: String = error.chars().take(300).collect();
            SpiralAction::SuggestDebugAgent { signature, log_ref, error_preview }
        } else {
            self.counts.insert(signature.clone(), 0);
            SpiralAction::AskUser { signature, count }
        }
    }
}

fn default_recipes() -> HashMap<String, String> {
    let entries: &[(&str, &str)] = &[
        (
            "TIMEOUT",
            "1. Create a simplified/faster version of the script\n\
             2. Reduce data size or iterations\n\
             3. Add progress output to see where it's stuck\n\
             4. Break into smaller steps that complete quickly",
        ),
        (
            "IMPORT_ERROR",
            "1. Check spelling of the module name\n\
             2. Install the missing dependency\n\
             3. Check the module is on the path\n\
             4. Verify the environment is activated",
        ),
        (
            "TYPE_ERROR",
            "1. Check variable types at the failure site\n\
             2. Add explicit type conversion\n\
             3. Verify function arguments match expected types",
        ),
        (
            "JSON_ERROR",
            "1. Convert non-serializable values before dumping\n\
             2. Check for circular references\n\
             3. Use a fallback string encoder for odd types",
        ),
        (
            "SYNTAX_ERROR",
            "1. Check for missing brackets or quotes\n\
             2. Look at the indicated line\n\
             3. Check for incompatible language version features",
        ),
        (
            "FILE_NOT_FOUND",
            "1. Verify the path with a directory listing\n\
             2. Check the working directory\n\
             3. Use an absolute path\n\
             4. Create parent directories if needed",
        ),
        (
            "PERMISSION_ERROR",
            "1. Check file permissions\n\
             2. Ensure you own the file or have write access\n\
             3. Don't write to system directories",
        ),
        (
            "MEMORY_ERROR",
            "1. Process data in smaller chunks\n\
             2. Stream instead of loading everything\n\
             3. Reduce the problem size",
        ),
        (
            "NETWORK_ERROR",
            "1. Check the service/URL is accessible\n\
             2. Verify network connectivity\n\
             3. Add retry logic with backoff",
        ),
        (
            "KEY_ERROR",
            "1. Check the exact key name (case-sensitive)\n\
             2. Use safe access with a default\n\
             3. Print the available keys",
        ),
        (
            "INDEX_ERROR",
            "1. Check the collection length before indexing\n\
             2. Add bounds checking\n\
             3. Verify loop ranges",
        ),
        (
            "NULL_ERROR",
            "1. Add a null check before access\n\
             2. Provide default values\n\
             3. Trace back to where the null originates",
        ),
        (
            "BUILD_ERROR",
            "1. Read the full error for the specific issue\n\
             2. Check for missing dependencies\n\
             3. Try a clean build",
        ),
        (
            "TEST_FAILURE",
            "1. Compare expected vs actual values in the error\n\
             2. Verify test data/fixtures\n\
             3. Run the single failing test in isolation",
        ),
    ];
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_normalization() {
        let a = error_signature("FileNotFoundError: no such file 'data_1.csv' at line 42");
        let b = error_signature("FileNotFoundError: no such file 'data_2.csv' at line 99");
        assert_eq!(a, "FILE_NOT_FOUND");
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_signature_is_stable() {
        let a = error_signature("weird failure xyzzy 42");
        let b = error_signature("weird failure xyzzy 17");
        assert!(a.starts_with("UNKNOWN_"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_three_stage_escalation_and_reset() {
        let mut detector = SpiralDetector::new();
        let err = "Command timed out after 120s";

        assert!(matches!(detector.observe(err), SpiralAction::InlineFix { .. }));
        assert!(matches!(detector.observe(err), SpiralAction::SuggestDebugAgent { .. }));
        assert!(matches!(detector.observe(err), SpiralAction::AskUser { count: 3, .. }));
        // counter reset: next occurrence starts over
        assert!(matches!(detector.observe(err), SpiralAction::InlineFix { .. }));
    }

    #[test]
    fn test_log_path_extraction() {
        let err = "build failed\nFull log: _logs/cargo_build_ab12cd34.log";
        assert_eq!(extract_log_path(err).unwrap(), "_logs/cargo_build_ab12cd34.log");
        assert!(extract_log_path("no log here").is_none());
    }
}
