//! The core agent execution loop: think → act → observe → repeat.
//!
//! One bounded iteration validates the context, calls the LLM, executes
//! every requested tool call, and appends each tool result directly
//! after the assistant message that requested it. Nothing else may be
//! appended in between; spiral warnings are deferred until the turn's
//! results are all in place.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::ContextWindow;
use crate::llm::{LlmClient, ToolChoice, Usage};
use crate::prompts::build_system_prompt;
use crate::skills::SkillSet;
use crate::spiral::SpiralDetector;
use crate::state::{generate_session_id, SessionState, StateManager, TodoItem};
use crate::tools::{ToolRegistry, ToolResult};
use crate::types::{Message, ToolCall};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Context size (estimated tokens) at which compression kicks in.
const COMPRESS_TOKEN_THRESHOLD: usize = 120_000;

/// Iterations left at which the limit warning fires.
const LIMIT_WARN_THRESHOLD: usize = 3;

pub const STOPPED_BY_USER: &str = "(Stopped by user)";

/// Configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model:            String,
    pub temperature:      f64,
    pub max_tokens:       u32,
    /// Hard cap on loop iterations. Complex tasks need the default;
    /// simple tasks typically finish in under 10.
    pub max_iterations:   usize,
    pub working_dir:      PathBuf,
    pub verbose:          bool,
    pub auto_save:        bool,
    pub state_dir:        PathBuf,
    pub reasoning_effort: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model:            DEFAULT_MODEL.to_string(),
            temperature:      0.0,
            max_tokens:       16384,
            max_iterations:   120,
            working_dir:      PathBuf::from("."),
            verbose:          true,
            auto_save:        true,
            state_dir:        PathBuf::from(".agent_states"),
            reasoning_effort: "medium".to_string(),
        }
    }
}

/// Shared interrupt flags. A signal handler sets `paused` and nothing
/// else; the loop observes the flags at its safe boundaries.
#[derive(Debug, Default)]
pub struct InterruptFlags {
    paused:    AtomicBool,
    cancelled: AtomicBool,
}

impl InterruptFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn clear_paused(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

/// Outcome of the pause menu.
#[derive(Debug, Clone)]
pub enum PauseDecision {
    Continue,
    Stop,
    /// Free-form feedback injected as a user message.
    Feedback(String),
}

/// Outcome of the iteration-limit warning.
#[derive(Debug, Clone)]
pub enum LimitDecision {
    WrapUp,
    Continue,
    /// Add this many iterations to the cap.
    Extend(usize),
}

/// A parsed ask_user payload handed to the terminal prompt callback.
#[derive(Debug, Clone)]
pub struct AskUserRequest {
    pub question: String,
    pub options:  Vec<String>,
    pub context:  Option<String>,
    pub default:  Option<String>,
}

impl AskUserRequest {
    fn from_output(output: &serde_json::Value) -> Self {
        Self {
            question: output
                .get("question")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            options:  output
                .get("options")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter().filter_map(|v| v.as_str()).map(|s| s.to_string()).collect()
                })
                .unwrap_or_default(),
            context:  output.get("context").and_then(|v| v.as_str()).map(|s| s.to_string()),
            default:  output.get("default").and_then(|v| v.as_str()).map(|s| s.to_string()),
        }
    }
}

pub type PauseMenuFn = Arc<dyn Fn() -> PauseDecision + Send + Sync>;
pub type LimitMenuFn = Arc<dyn Fn(usize, &[TodoItem]) -> LimitDecision + Send + Sync>;
pub type UserPromptFn = Arc<dyn Fn(&AskUserRequest) -> String + Send + Sync>;

/// The core agent execution loop.
pub struct AgentLoop {
    pub config: AgentConfig,
    tools:      ToolRegistry,
    llm:        Arc<dyn LlmClient>,
    context:    ContextWindow,
    state:      SessionState,
    state_manager: StateManager,
    skills:     Option<Arc<SkillSet>>,
    spiral:     SpiralDetector,
    interrupts: Arc<InterruptFlags>,

    iteration_count: usize,
    total_usage:     Usage,

    pause_menu:  Option<PauseMenuFn>,
    limit_menu:  Option<LimitMenuFn>,
    user_prompt: Option<UserPromptFn>,
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("config", &self.config)
            .field("iteration_count", &self.iteration_count)
            .field("total_usage", &self.total_usage)
            .finish_non_exhaustive()
    }
}

impl AgentLoop {
    pub fn new(config: AgentConfig, tools: ToolRegistry, llm: Arc<dyn LlmClient>) -> Self {
        Self::with_system_prompt(config, tools, llm, None)
    }

    pub fn with_system_prompt(
        config: AgentConfig,
        tools: ToolRegistry,
        llm: Arc<dyn LlmClient>,
        system_prompt: Option<String>,
    ) -> Self {
        let prompt = build_system_prompt(&config.working_dir, system_prompt.as_deref());
        let session_id = generate_session_id("");
        let state = SessionState::new(
            session_id.as_str(),
            prompt.as_str(),
            config.working_dir.display().to_string(),
            config.model.as_str(),
            config.temperature,
            config.max_iterations,
        );

        Self {
            state_manager: StateManager::new(&config.state_dir),
            context: ContextWindow::new(prompt),
            state,
            tools,
            llm,
            config,
            skills: None,
            spiral: SpiralDetector::new(),
            interrupts: Arc::new(InterruptFlags::new()),
            iteration_count: 0,
            total_usage: Usage::default(),
            pause_menu: None,
            limit_menu: None,
            user_prompt: None,
        }
    }

    // ── Wiring ──────────────────────────────────────────────────────────

    pub fn with_skills(mut self, skills: Arc<SkillSet>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_spiral_detector(mut self, spiral: SpiralDetector) -> Self {
        self.spiral = spiral;
        self
    }

    pub fn on_pause_menu(mut self, f: PauseMenuFn) -> Self {
        self.pause_menu = Some(f);
        self
    }

    pub fn on_iteration_warning(mut self, f: LimitMenuFn) -> Self {
        self.limit_menu = Some(f);
        self
    }

    pub fn on_user_prompt(mut self, f: UserPromptFn) -> Self {
        self.user_prompt = Some(f);
        self
    }

    /// Handle for signal handlers and tests: `pause()` runs the pause
    /// menu at the next safe boundary, `cancel()` stops cleanly.
    pub fn interrupt_handle(&self) -> Arc<InterruptFlags> {
        Arc::clone(&self.interrupts)
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    pub fn total_usage(&self) -> Usage {
        self.total_usage
    }

    pub fn context(&self) -> &ContextWindow {
        &self.context
    }

    pub fn todos(&self) -> &[TodoItem] {
        &self.state.todos.items
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    // ── Session management ──────────────────────────────────────────────

    pub fn save_session(&mut self) -> Result<String, crate::error::EngineError> {
        self.state.capture(&self.context);
        self.state_manager.save(&self.state)?;
        Ok(self.state.session_id.clone())
    }

    pub fn load_session(&mut self, session_id: &str) -> bool {
        match self.state_manager.load(session_id) {
            Ok(Some(state)) => {
                self.context = state.restore_context();
                self.state = state;
                true
            }
            _ => false,
        }
    }

    // ── Main loop ───────────────────────────────────────────────────────

    /// Run the loop until completion. Returns the final assistant text.
    ///
    /// LLM transport failures return a diagnostic string rather than an
    /// error: a broken iteration must not crash the orchestrator above.
    pub async fn run(&mut self, task: &str, max_iterations: Option<usize>) -> String {
        let mut max_iter = max_iterations.unwrap_or(self.config.max_iterations);
        let mut limit_checked = false;

        // Pre-task skill injection: first matching trigger wins.
        if let Some(skills) = &self.skills {
            if let Some(skill) = skills.match_task(task) {
                tracing::info!(skill = %skill.name, "matched skill, injecting workflow");
                self.context.add_user_message(format!(
                    "[SYSTEM] Matched skill: {}\n\n{}\n\n---\n\n\
                     **Follow this workflow:**\n\n{}\n\n---",
                    skill.name, skill.description, skill.workflow
                ));
            }
        }

        self.context.add_user_message(task);
        let mut final_response = String::new();

        while self.iteration_count < max_iter {
            if self.interrupts.is_cancelled() {
                final_response = STOPPED_BY_USER.to_string();
                break;
            }

            if self.interrupts.is_paused() {
                self.handle_pause_menu();
                if self.interrupts.is_cancelled() {
                    final_response = STOPPED_BY_USER.to_string();
                    break;
                }
            }

            // Warn once when close to the cap with work still open.
            if !limit_checked {
                let iterations_left = max_iter - self.iteration_count;
                if iterations_left <= LIMIT_WARN_THRESHOLD {
                    let incomplete: Vec<TodoItem> =
                        self.state.todos.incomplete().into_iter().cloned().collect();
                    if !incomplete.is_empty() {
                        let decision = match &self.limit_menu {
                            Some(menu) => menu(iterations_left, &incomplete),
                            None => LimitDecision::Continue,
                        };
                        match decision {
                            LimitDecision::WrapUp => {
                                final_response = self.wrap_up().await;
                                break;
                            }
                            LimitDecision::Continue => limit_checked = true,
                            LimitDecision::Extend(n) => {
                                max_iter += n;
                                tracing::info!(new_max = max_iter, "iteration cap extended");
                            }
                        }
                    } else {
                        limit_checked = true;
                    }
                }
            }

            self.iteration_count += 1;
            tracing::info!(iteration = self.iteration_count, max = max_iter, "agent loop tick");

            let repairs = self.context.validate_and_repair();
            for repair in &repairs {
                tracing::warn!(repair = %repair, "context repair");
            }

            if self.context.token_estimate() > COMPRESS_TOKEN_THRESHOLD {
                self.compress_context().await;
            }

            let response = match self
                .llm
                .chat(&self.context.messages_with_system(), &self.tools.schemas(), ToolChoice::Auto)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(error = %e, "LLM call failed");
                    final_response = format!("(Error: {})", e);
                    break;
                }
            };
            self.total_usage.add(response.usage);

            if self.interrupts.is_paused() {
                self.handle_pause_menu();
                if self.interrupts.is_cancelled() {
                    final_response = STOPPED_BY_USER.to_string();
                    break;
                }
            }

            if response.tool_calls.is_empty() {
                // No tool calls = done.
                final_response = response.content.clone();
                self.context.add_assistant_message(Message::assistant(response.content));
                break;
            }

            // Assistant message first, with the tool_calls list intact,
            // then one tool result per call id, and nothing in between.
            self.context.add_assistant_message(Message::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            let deferred_errors = self.execute_tool_calls(&response.tool_calls).await;

            // All tool results are in place; spiral warnings may now be
            // appended.
            for error in deferred_errors {
                let action = self.spiral.observe(&error);
                tracing::debug!(action = ?action, "spiral escalation");
                self.context.add_user_message(action.to_message());
            }

            if self.interrupts.is_cancelled() {
                final_response = STOPPED_BY_USER.to_string();
                break;
            }
            if self.interrupts.is_paused() {
                self.handle_pause_menu();
                if self.interrupts.is_cancelled() {
                    final_response = STOPPED_BY_USER.to_string();
                    break;
                }
            }
        }

        if self.iteration_count >= max_iter && final_response.is_empty() {
            tracing::warn!(max_iter, "reached maximum iterations");
            final_response = self.wrap_up().await;
        }

        if self.config.auto_save {
            if let Err(e) = self.save_session() {
                tracing::warn!(error = %e, "failed to auto-save session");
            }
        }

        tracing::info!(
            iterations = self.iteration_count,
            tokens = self.total_usage.total(),
            "task finished"
        );

        final_response
    }

    /// Execute all tool calls of one assistant turn. Every call id gets
    /// exactly one tool result appended, even when execution fails.
    /// Returns the error strings for deferred spiral checking.
    async fn execute_tool_calls(&mut self, tool_calls: &[ToolCall]) -> Vec<String> {
        let mut deferred_errors = Vec::new();

        for tc in tool_calls {
            tracing::debug!(tool = %tc.name, id = %tc.id, "executing tool");
            let mut result = self.tools.execute(&tc.name, &tc.arguments).await;

            // ask_user round-trip: the loop, not the tool, prompts the
            // user and substitutes their literal answer.
            if result.success && result.awaiting_user_input() {
                let request = AskUserRequest::from_output(&result.output);
                let answer = match &self.user_prompt {
                    Some(prompt) => prompt(&request),
                    None => request
                        .default
                        .clone()
                        .unwrap_or_else(|| "No response provided".to_string()),
                };
                result = ToolResult::ok(format!("User responded: {}", answer));
            }

            self.context.add_tool_result(tc.id.as_str(), tc.name.as_str(), result.to_message());

            // Keep the local todo list in step with the todo tool.
            if tc.name == "todo" && result.success {
                if let Some(todos) = tc.arguments.get("todos").and_then(|v| v.as_array()) {
                    self.state.todos.sync_from_tool(todos);
                }
            }

            if let Some(error) = &result.error {
                deferred_errors.push(error.clone());
            } else if let serde_json::Value::String(s) = &result.output {
                if s.to_lowercase().contains("error") {
                    deferred_errors.push(s.clone());
                }
            }
        }

        deferred_errors
    }

    fn handle_pause_menu(&mut self) {
        let decision = match &self.pause_menu {
            Some(menu) => menu(),
            None => PauseDecision::Continue,
        };
        match decision {
            PauseDecision::Stop => self.interrupts.cancel(),
            PauseDecision::Feedback(feedback) => {
                self.context.add_user_message(format!("[User feedback]: {}", feedback));
            }
            PauseDecision::Continue => {}
        }
        self.interrupts.clear_paused();
    }

    /// Compress the context: find a safe middle range, summarize it with
    /// one LLM call, splice the summary in.
    async fn compress_context(&mut self) {
        let Some((start, end)) = self.context.compression_range() else {
            return;
        };
        tracing::info!(start, end, "compressing context");

        let formatted = format_for_summary(&self.context.messages()[start..end]);
        let prompt = format!(
            "Summarize the following conversation context concisely.\n\
             Focus on:\n\
             1. Key decisions made\n\
             2. Important findings/results\n\
             3. Files created or modified\n\
             4. Current state of the task\n\n\
             Context to summarize:\n{}\n\n\
             Provide a concise summary (max 500 words):",
            formatted
        );

        let summary = match self.llm.chat(&[Message::user(prompt)], &[], ToolChoice::None).await {
            Ok(r) => r.content,
            Err(e) => format!("[Context summary failed: {}]", e),
        };
        self.context.apply_compression(start, end, Some(summary));
    }

    /// Request a terminal summary with no further tool calls; fall back
    /// to a synthesis from the todo list if the LLM call fails.
    async fn wrap_up(&mut self) -> String {
        self.context.add_user_message(
            "[SYSTEM] Iteration limit approaching. Please provide a concise summary of:\n\
             1. What was accomplished\n\
             2. Current state of incomplete tasks\n\
             3. What remains to be done\n\
             Do NOT make any more tool calls - just summarize.",
        );

        let repairs = self.context.validate_and_repair();
        for repair in &repairs {
            tracing::warn!(repair = %repair, "context repair");
        }

        match self
            .llm
            .chat(&self.context.messages_with_system(), &[], ToolChoice::None)
            .await
        {
            Ok(r) if !r.content.is_empty() => {
                self.total_usage.add(r.usage);
                self.context.add_assistant_message(Message::assistant(r.content.clone()));
                r.content
            }
            _ => self.summary_from_todos(),
        }
    }

    fn summary_from_todos(&self) -> String {
        let mut out = String::from("## Progress Summary\n\n");
        let done: Vec<&TodoItem> = self
            .state
            .todos
            .items
            .iter()
            .filter(|t| t.status == crate::state::TodoStatus::Done)
            .collect();
        let incomplete = self.state.todos.incomplete();

        if !done.is_empty() {
            out.push_str("### Completed:\n");
            for t in done {
                out.push_str(&format!("- {}\n", t.description));
            }
        }
        if !incomplete.is_empty() {
            out.push_str("\n### Incomplete:\n");
            for t in incomplete {
                out.push_str(&format!("- [{:?}] {}\n", t.status, t.description));
            }
        }
        out
    }
}

fn format_for_summary(messages: &[Message]) -> String {
    let mut formatted = Vec::new();
    for msg in messages {
        match msg.role {
            crate::types::Role::Tool => {
                let name = msg.name.as_deref().unwrap_or("tool");
                let content: String = msg.content.chars().take(500).collect();
                formatted.push(format!("[Tool: {}] {}", name, content));
            }
            crate::types::Role::Assistant => {
                if let Some(calls) = &msg.tool_calls {
                    let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
                    formatted.push(format!("[Assistant used tools: {}]", names.join(", ")));
                }
                if !msg.content.is_empty() {
                    let content: String = msg.content.chars().take(300).collect();
                    formatted.push(format!("[Assistant] {}", content));
                }
            }
            _ => {
                let content: String = msg.content.chars().take(200).collect();
                formatted.push(format!("[{}] {}", msg.role, content));
            }
        }
    }
    formatted.join("\n")
}
