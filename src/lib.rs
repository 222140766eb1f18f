//! taskforge: an autonomous task execution engine.
//!
//! A user supplies a natural-language task; the engine drives an LLM
//! through a bounded loop of proposal → tool invocation → observation,
//! optionally decomposing work across isolated sub-executors and gating
//! final outputs with provenance-backed verification.

pub mod agent;
pub mod artifact;
pub mod builder;
pub mod context;
pub mod error;
pub mod evidence;
pub mod graph;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod provenance;
pub mod skills;
pub mod spiral;
pub mod state;
pub mod store;
pub mod subagent;
pub mod tools;
pub mod types;

// Convenience re-exports at crate root
pub use agent::{AgentConfig, AgentLoop, InterruptFlags, DEFAULT_MODEL};
pub use builder::AgentBuilder;
pub use context::ContextWindow;
pub use error::EngineError;
pub use graph::{Task, TaskGraph, TaskStatus, TaskType};
pub use llm::{AnthropicClient, ChatResponse, LlmClient, MockLlm, OpenAiClient, RetryingLlm};
pub use orchestrator::{
    ExecutionResult, OrchestratorConfig, RunSummary, TaskOrchestrator, WorkflowBuilder,
};
pub use provenance::{ProvenanceChecker, ProvenanceResult};
pub use skills::{Skill, SkillSet};
pub use state::{SessionState, StateManager};
pub use subagent::{SubAgentOrchestrator, SubAgentProfile, SubAgentResult};
pub use tools::{build_registry, Tool, ToolRegistry, ToolResult};
pub use types::{Message, Role, ToolCall, ToolSchema};
