//! Agent loop behavior: tool pairing across iterations, interrupts,
//! spiral escalation, wrap-up, and the ask-user round-trip.
//!
//! All tests use the scripted `MockLlm` — no network calls are made.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use taskforge::agent::{
    AgentConfig, AgentLoop, InterruptFlags, PauseDecision, STOPPED_BY_USER,
};
use taskforge::llm::{ChatResponse, MockLlm};
use taskforge::tools::{AskUserTool, Tool, ToolArgs, ToolRegistry, ToolResult};
use taskforge::types::{Message, Role, ToolCall};

// ─────────────────────────────────────────────────────────────────────────────
// Test helpers
// ─────────────────────────────────────────────────────────────────────────────

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo the text back"
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    async fn execute(&self, args: &ToolArgs) -> ToolResult {
        ToolResult::ok(args.get("text").cloned().unwrap_or_default())
    }
}

/// A tool that always fails with a recognizable error class.
struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": { "any": { "type": "string" } } })
    }
    async fn execute(&self, _args: &ToolArgs) -> ToolResult {
        ToolResult::fail("FileNotFoundError: no such file 'missing.csv'")
    }
}

/// A tool that flips the loop's cancelled flag, as a user-driven stop
/// arriving mid-run would.
struct CancelTool {
    flags: Mutex<Option<Arc<InterruptFlags>>>,
}

impl CancelTool {
    fn new() -> Arc<Self> {
        Arc::new(Self { flags: Mutex::new(None) })
    }
    fn wire(&self, flags: Arc<InterruptFlags>) {
        *self.flags.lock().unwrap() = Some(flags);
    }
}

#[async_trait]
impl Tool for CancelTool {
    fn name(&self) -> &str {
        "cancel"
    }
    fn description(&self) -> &str {
        "Cancels the run"
    }
    fn parameters(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": { "why": { "type": "string" } } })
    }
    async fn execute(&self, _args: &ToolArgs) -> ToolResult {
        if let Some(flags) = &*self.flags.lock().unwrap() {
            flags.cancel();
        }
        ToolResult::ok("cancel requested")
    }
}

fn tool_call(id: &str, name: &str, args: &[(&str, &str)]) -> ToolCall {
    let arguments: HashMap<String, serde_json::Value> =
        args.iter().map(|(k, v)| (k.to_string(), json!(v))).collect();
    ToolCall::new(id, name, arguments)
}

fn test_config() -> AgentConfig {
    AgentConfig {
        working_dir: std::env::temp_dir(),
        state_dir: std::env::temp_dir().join(".taskforge_test_states"),
        auto_save: false,
        verbose: false,
        ..Default::default()
    }
}

fn agent_with(tools: ToolRegistry, llm: MockLlm) -> AgentLoop {
    AgentLoop::new(test_config(), tools, Arc::new(llm))
}

/// Check the pairing invariant over a finished context.
fn assert_pairing(messages: &[Message]) {
    let mut open: Vec<String> = Vec::new();
    for msg in messages {
        match msg.role {
            Role::Assistant => {
                assert!(open.is_empty(), "tool calls unanswered before assistant turn");
                if let Some(calls) = &msg.tool_calls {
                    open.extend(calls.iter().map(|c| c.id.clone()));
                }
            }
            Role::Tool => {
                let id = msg.tool_call_id.clone().expect("tool msg without id");
                let pos = open.iter().position(|o| *o == id).expect("orphaned tool result");
                open.remove(pos);
            }
            _ => {}
        }
    }
    assert!(open.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// P1: pairing holds across a full run
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_round_trip_preserves_pairing() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(EchoTool));

    let llm = MockLlm::new(vec![
        ChatResponse::with_tool_calls(
            "let me check",
            vec![
                tool_call("c1", "echo", &[("text", "one")]),
                tool_call("c2", "echo", &[("text", "two")]),
            ],
        ),
        ChatResponse::text("both echoed"),
    ]);

    let mut agent = agent_with(tools, llm);
    let out = agent.run("echo twice", None).await;

    assert_eq!(out, "both echoed");
    assert_eq!(agent.iteration_count(), 2);
    assert_pairing(agent.context().messages());

    // The assistant message kept its tool_calls list and ids.
    let assistant = agent
        .context()
        .messages()
        .iter()
        .find(|m| m.has_tool_calls())
        .expect("assistant turn with tool calls");
    let ids: Vec<&str> =
        assistant.tool_calls.as_ref().unwrap().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
}

#[tokio::test]
async fn unknown_tool_becomes_failure_result_not_crash() {
    let llm = MockLlm::new(vec![
        ChatResponse::with_tool_calls("", vec![tool_call("c1", "ghost", &[("x", "y")])]),
        ChatResponse::text("recovered"),
    ]);

    let mut agent = agent_with(ToolRegistry::new(), llm);
    let out = agent.run("use a missing tool", None).await;

    assert_eq!(out, "recovered");
    let tool_msg = agent
        .context()
        .messages()
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool result for the failed call");
    assert!(tool_msg.content.contains("not found"));
    assert_pairing(agent.context().messages());
}

// ─────────────────────────────────────────────────────────────────────────────
// Spiral escalation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_error_escalates_after_tool_results() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(BrokenTool));

    let llm = MockLlm::new(vec![
        ChatResponse::with_tool_calls("", vec![tool_call("e1", "broken", &[("any", "1")])]),
        ChatResponse::with_tool_calls("", vec![tool_call("e2", "broken", &[("any", "2")])]),
        ChatResponse::text("giving up"),
    ]);

    let mut agent = agent_with(tools, llm);
    agent.run("poke the broken tool", None).await;

    let messages = agent.context().messages();
    assert_pairing(messages);

    // Stage 1 then stage 2, each injected after its turn's tool result.
    let stage1 = messages
        .iter()
        .position(|m| m.content.contains("Error detected: FILE_NOT_FOUND"))
        .expect("inline fix message");
    let stage2 = messages
        .iter()
        .position(|m| m.content.contains("Same error occurred again: FILE_NOT_FOUND"))
        .expect("debug delegation message");
    assert!(stage2 > stage1);
    assert!(messages[stage2].content.contains("debug"));

    let first_result = messages.iter().position(|m| m.role == Role::Tool).unwrap();
    assert!(stage1 > first_result, "spiral message must come after the tool result");
}

// ─────────────────────────────────────────────────────────────────────────────
// P12: interrupts
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_mid_run_stops_at_next_boundary() {
    let cancel_tool = CancelTool::new();
    let mut tools = ToolRegistry::new();
    tools.register(Arc::clone(&cancel_tool) as Arc<dyn Tool>);

    let llm = MockLlm::new(vec![
        ChatResponse::with_tool_calls("", vec![tool_call("k1", "cancel", &[("why", "test")])]),
        ChatResponse::text("should never be produced"),
    ]);

    let mut agent = agent_with(tools, llm);
    cancel_tool.wire(agent.interrupt_handle());

    let out = agent.run("then stop", None).await;
    assert_eq!(out, STOPPED_BY_USER);
    assert_eq!(agent.iteration_count(), 1, "no further iteration after cancel");
    assert_pairing(agent.context().messages());
}

#[tokio::test]
async fn paused_flag_runs_menu_before_any_llm_call() {
    let llm = MockLlm::new(vec![ChatResponse::text("unreachable")]);
    let mut agent = agent_with(ToolRegistry::new(), llm)
        .on_pause_menu(Arc::new(|| PauseDecision::Stop));

    agent.interrupt_handle().pause();
    let out = agent.run("task", None).await;

    assert_eq!(out, STOPPED_BY_USER);
    assert_eq!(agent.iteration_count(), 0);
}

#[tokio::test]
async fn pause_feedback_is_injected_as_user_message() {
    let llm = MockLlm::new(vec![ChatResponse::text("done with feedback")]);
    let mut agent = agent_with(ToolRegistry::new(), llm)
        .on_pause_menu(Arc::new(|| PauseDecision::Feedback("focus on tests".into())));

    agent.interrupt_handle().pause();
    let out = agent.run("task", None).await;

    assert_eq!(out, "done with feedback");
    assert!(agent
        .context()
        .messages()
        .iter()
        .any(|m| m.role == Role::User && m.content.contains("focus on tests")));
}

// ─────────────────────────────────────────────────────────────────────────────
// Wrap-up at the iteration limit
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn iteration_limit_triggers_wrap_up_call() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(EchoTool));

    let llm = MockLlm::new(vec![
        ChatResponse::with_tool_calls("", vec![tool_call("w1", "echo", &[("text", "a")])]),
        ChatResponse::with_tool_calls("", vec![tool_call("w2", "echo", &[("text", "b")])]),
        // wrap-up response
        ChatResponse::text("summary of progress"),
    ]);

    let mut agent = agent_with(tools, llm);
    let out = agent.run("never finishes", Some(2)).await;

    assert_eq!(out, "summary of progress");
    assert_eq!(agent.iteration_count(), 2);
    assert!(agent
        .context()
        .messages()
        .iter()
        .any(|m| m.role == Role::User && m.content.contains("Iteration limit approaching")));
}

#[tokio::test]
async fn wrap_up_falls_back_to_todo_summary_on_llm_failure() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(EchoTool));

    let llm = MockLlm::scripted(vec![
        Ok(ChatResponse::with_tool_calls(
            "",
            vec![tool_call("x1", "echo", &[("text", "a")])],
        )),
        Err("transport down".to_string()), // wrap-up call fails
    ]);

    let mut agent = agent_with(tools, llm);
    let out = agent.run("task", Some(1)).await;
    assert!(out.contains("Progress Summary"));
}

// ─────────────────────────────────────────────────────────────────────────────
// ask-user round-trip
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ask_user_answer_replaces_tool_payload() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(AskUserTool::new()));

    let llm = MockLlm::new(vec![
        ChatResponse::with_tool_calls(
            "",
            vec![tool_call("q1", "ask_user", &[("question", "Which colour?")])],
        ),
        ChatResponse::text("using blue"),
    ]);

    let asked = Arc::new(Mutex::new(Vec::new()));
    let asked_clone = Arc::clone(&asked);

    let mut agent = agent_with(tools, llm).on_user_prompt(Arc::new(move |request| {
        asked_clone.lock().unwrap().push(request.question.clone());
        "blue".to_string()
    }));

    let out = agent.run("pick a colour", None).await;
    assert_eq!(out, "using blue");
    assert_eq!(asked.lock().unwrap().as_slice(), &["Which colour?".to_string()]);

    let tool_msg = agent
        .context()
        .messages()
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("ask_user result");
    assert_eq!(tool_msg.content, "User responded: blue");
    assert!(!tool_msg.content.contains("awaiting_user_input"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Skill injection
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn matching_skill_workflow_precedes_the_task() {
    use taskforge::{Skill, SkillSet};

    let mut skills = SkillSet::new();
    skills.register(Skill {
        name:        "sweep".into(),
        description: "parameter sweep workflow".into(),
        triggers:    vec!["parameter sweep".into()],
        workflow:    "1. enumerate grid\n2. run each point".into(),
    });

    let llm = MockLlm::new(vec![ChatResponse::text("ok")]);
    let mut agent =
        agent_with(ToolRegistry::new(), llm).with_skills(Arc::new(skills));

    agent.run("run a parameter sweep over epsilon", None).await;

    let messages = agent.context().messages();
    let injected = messages
        .iter()
        .position(|m| m.content.contains("Matched skill: sweep"))
        .expect("skill injection");
    let task = messages
        .iter()
        .position(|m| m.content.contains("run a parameter sweep over epsilon"))
        .expect("task message");
    assert!(injected < task, "skill workflow must precede the task");
}
