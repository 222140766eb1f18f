//! System prompt assembly.
//!
//! Prompts are plain text blobs injected as system messages. A caller-
//! provided override always wins over the built-in composition.

const CORE_PROMPT: &str = r#"You are an autonomous engineering agent. You solve tasks by
iterating: think about the next step, call a tool, observe the result,
repeat. When the task is done, reply without tool calls.

Rules:
- Work inside the project directory given below. The filesystem is your
  memory: write intermediate results to files.
- Track multi-step work with the todo tool, including dependencies
  between tasks and result keys for outputs dependents need.
- Never fabricate data, file contents, command output, or URLs. Every
  download and command run is logged and independently verified.
- Verify your own work: run tests or re-read outputs before declaring a
  task complete.
- Use ask_user only when a decision genuinely requires the user.
"#;

const TOOLING_PROMPT: &str = r#"Tool notes:
- bash: shell access; long installs/builds are truncated, full logs land
  in _logs/.
- file_ops: read/write/edit/list files.
- search: glob over paths, regex over contents.
- web: search(query) and fetch(url, save_to?); fetches are logged.
- todo: the dependency-aware task list.
"#;

/// Build the default system prompt, or return the override verbatim.
pub fn build_system_prompt(working_dir: &std::path::Path, override_prompt: Option<&str>) -> String {
    if let Some(custom) = override_prompt {
        return custom.to_string();
    }
    format!(
        "{}\n{}\nProject directory: {}\n",
        CORE_PROMPT,
        TOOLING_PROMPT,
        working_dir.display()
    )
}

/// Adversarial prompt for the verification sub-executor. The verifier
/// sees only the claim and the evidence, never the worker's reasoning.
pub const VERIFIER_PROMPT: &str = r#"You are an independent verification auditor. You receive a
CLAIM about completed work and EVIDENCE gathered from logs and the
filesystem. Your job is to decide whether the evidence actually supports
the claim. Be skeptical: treat missing evidence as a problem, and look
actively for signs of fabrication (claimed downloads with no fetch log,
claimed test runs with no execution record, files too small for their
claimed contents, placeholder or synthetic-looking data).

Respond with ONLY a JSON object:
{
  "verdict": "verified" | "refuted" | "insufficient",
  "confidence": 0.0-1.0,
  "issues": ["..."],
  "reasoning": "...",
  "supporting_facts": ["..."],
  "fabrication_indicators": ["..."],
  "missing_evidence": ["..."]
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let p = build_system_prompt(std::path::Path::new("/tmp/x"), Some("custom"));
        assert_eq!(p, "custom");
    }

    #[test]
    fn test_builtin_includes_working_dir() {
        let p = build_system_prompt(std::path::Path::new("/tmp/project"), None);
        assert!(p.contains("/tmp/project"));
        assert!(p.contains("todo"));
    }
}
