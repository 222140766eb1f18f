//! Isolated sub-executor instances.
//!
//! Each sub-executor is instantiated fresh with its own context window
//! and iteration counter, a tool registry filtered to its profile, and
//! no ability to spawn further sub-executors. The parent sees only the
//! returned result, never intermediate reasoning.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::agent::{AgentConfig, AgentLoop, DEFAULT_MODEL};
use crate::llm::LlmClient;
use crate::prompts::VERIFIER_PROMPT;
use crate::tools::ToolRegistry;

pub const FAST_MODEL: &str = "claude-3-5-haiku-20241022";
pub const CODING_MODEL: &str = DEFAULT_MODEL;
pub const DEEP_MODEL: &str = "claude-opus-4-20250514";

/// Tool names that would allow recursive spawning; always unregistered
/// before a sub-executor starts.
const SPAWN_TOOLS: &[&str] = &["task", "spawn_agent"];

/// Named executor profile: prompt, model, iteration cap, allowed tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentProfile {
    pub name:           String,
    pub description:    String,
    pub system_prompt:  String,
    pub model:          String,
    pub max_iterations: usize,
    /// `None` = all tools.
    pub allowed_tools:  Option<Vec<String>>,
    pub temperature:    f64,
}

impl SubAgentProfile {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name:           name.into(),
            description:    description.into(),
            system_prompt:  String::new(),
            model:          CODING_MODEL.to_string(),
            max_iterations: 20,
            allowed_tools:  None,
            temperature:    0.0,
        }
    }
}

/// Result from a sub-executor run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentResult {
    pub agent_name:       String,
    pub task:             String,
    pub success:          bool,
    pub output:           String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:            Option<String>,
    pub iterations:       usize,
    pub tokens_used:      u32,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id:       Option<String>,
}

impl SubAgentResult {
    fn failure(agent_name: &str, task: &str, error: impl Into<String>) -> Self {
        Self {
            agent_name:       agent_name.to_string(),
            task:             task.to_string(),
            success:          false,
            output:           String::new(),
            error:            Some(error.into()),
            iterations:       0,
            tokens_used:      0,
            duration_seconds: 0.0,
            session_id:       None,
        }
    }
}

/// Registry of available sub-executor profiles.
pub struct SubAgentRegistry {
    profiles: Vec<SubAgentProfile>,
}

impl SubAgentRegistry {
    pub fn new() -> Self {
        let mut registry = Self { profiles: Vec::new() };
        registry.register_defaults();
        registry
    }

    pub fn empty() -> Self {
        Self { profiles: Vec::new() }
    }

    pub fn register(&mut self, profile: SubAgentProfile) {
        self.profiles.retain(|p| p.name != profile.name);
        self.profiles.push(profile);
    }

    pub fn get(&self, name: &str) -> Option<&SubAgentProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.name.clone()).collect()
    }

    fn register_defaults(&mut self) {
        self.register(SubAgentProfile {
            name:           "explore".to_string(),
            description:    "Fast codebase exploration. Use for quick searches and file lookups."
                .to_string(),
            system_prompt:  "You are a fast exploration agent. Quickly find and report \
                             information.\n\n\
                             - Search for files and patterns\n\
                             - Read files and summarize\n\
                             - List directory contents\n\n\
                             Report what you found and where (paths, line numbers). \
                             Do NOT make changes. Only explore and report."
                .to_string(),
            model:          FAST_MODEL.to_string(),
            max_iterations: 15,
            allowed_tools:  Some(vec![
                "file_ops".to_string(),
                "search".to_string(),
                "bash".to_string(),
            ]),
            temperature:    0.0,
        });

        self.register(SubAgentProfile {
            name:           "debug".to_string(),
            description:    "Investigate errors, trace root causes, research solutions. \
                             Use when fixing errors."
                .to_string(),
            system_prompt:  "You are a debugging agent. Thoroughly investigate errors and \
                             find solutions.\n\n\
                             1. Read the full error/log file\n\
                             2. Identify the actual error (not just symptoms)\n\
                             3. Trace back to the source\n\
                             4. Search online for unfamiliar errors\n\
                             5. Report root cause and fix\n\n\
                             Do NOT make changes. Only investigate and report."
                .to_string(),
            model:          CODING_MODEL.to_string(),
            max_iterations: 30,
            allowed_tools:  Some(vec![
                "file_ops".to_string(),
                "search".to_string(),
                "bash".to_string(),
                "web".to_string(),
                "skill".to_string(),
            ]),
            temperature:    0.0,
        });

        self.register(SubAgentProfile {
            name:           "research".to_string(),
            description:    "Web research, documentation lookup, literature review. \
                             Use for external knowledge."
                .to_string(),
            system_prompt:  "You are a research agent. Find and synthesize information \
                             from the web.\n\n\
                             1. Search with specific queries\n\
                             2. Fetch promising sources\n\
                             3. Extract key information\n\n\
                             Report findings with sources. Always cite sources. \
                             Do NOT fabricate information."
                .to_string(),
            model:          CODING_MODEL.to_string(),
            max_iterations: 20,
            allowed_tools:  Some(vec![
                "web".to_string(),
                "file_ops".to_string(),
                "search".to_string(),
            ]),
            temperature:    0.0,
        });

        self.register(SubAgentProfile {
            name:           "plan".to_string(),
            description:    "Break down complex tasks into steps. Use before implementing \
                             anything non-trivial."
                .to_string(),
            system_prompt:  "You are a planning agent. Analyze problems and create \
                             actionable plans.\n\n\
                             1. Understand the goal\n\
                             2. Explore what exists\n\
                             3. Identify concrete steps with dependencies\n\n\
                             Output a numbered plan with dependency notes. \
                             Do NOT execute. Only plan."
                .to_string(),
            model:          DEEP_MODEL.to_string(),
            max_iterations: 15,
            allowed_tools:  Some(vec![
                "file_ops".to_string(),
                "search".to_string(),
                "bash".to_string(),
                "web".to_string(),
                "skill".to_string(),
                "todo".to_string(),
            ]),
            temperature:    0.0,
        });

        self.register(SubAgentProfile {
            name:           "general".to_string(),
            description:    "Complex multi-step tasks requiring exploration AND action."
                .to_string(),
            system_prompt:  "You are a capable agent for complex tasks.\n\n\
                             Think step by step:\n\
                             1. Understand what's needed\n\
                             2. Explore to gather context\n\
                             3. Execute the task\n\
                             4. Verify the result\n\n\
                             Use all available tools as needed."
                .to_string(),
            model:          CODING_MODEL.to_string(),
            max_iterations: 50,
            allowed_tools:  None,
            temperature:    0.0,
        });

        self.register(SubAgentProfile {
            name:           "reviewer".to_string(),
            description:    "Review completed work for correctness and completeness."
                .to_string(),
            system_prompt:  "You are a code and result reviewer. Read the relevant files \
                             and outputs, check them against the task description, and \
                             report concrete problems with locations. \
                             Do NOT make changes."
                .to_string(),
            model:          CODING_MODEL.to_string(),
            max_iterations: 20,
            allowed_tools:  Some(vec![
                "file_ops".to_string(),
                "search".to_string(),
                "bash".to_string(),
            ]),
            temperature:    0.0,
        });

        // Independent verification: fresh context, read-only tools,
        // adversarial prompt.
        self.register(SubAgentProfile {
            name:           "verifier".to_string(),
            description:    "Independent verification of claims against evidence."
                .to_string(),
            system_prompt:  VERIFIER_PROMPT.to_string(),
            model:          CODING_MODEL.to_string(),
            max_iterations: 10,
            allowed_tools:  Some(vec!["file_ops".to_string(), "search".to_string()]),
            temperature:    0.0,
        });
    }
}

impl Default for SubAgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the LLM client for a given profile. Swapped out in tests.
pub type LlmFactory = Arc<dyn Fn(&SubAgentProfile) -> Arc<dyn LlmClient> + Send + Sync>;

/// An isolated agent instance with its own context.
pub struct SubAgent {
    profile: SubAgentProfile,
    agent:   AgentLoop,
}

impl SubAgent {
    /// Build a fresh sub-executor: filtered tools, no spawn tools, own
    /// context window.
    pub fn new(
        profile: SubAgentProfile,
        base_tools: &ToolRegistry,
        working_dir: PathBuf,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let mut tools = match &profile.allowed_tools {
            Some(allowed) => base_tools.filtered(allowed),
            None => base_tools.clone(),
        };
        for spawn_tool in SPAWN_TOOLS {
            tools.unregister(spawn_tool);
        }

        let config = AgentConfig {
            model: profile.model.clone(),
            temperature: profile.temperature,
            max_iterations: profile.max_iterations,
            working_dir,
            verbose: false,
            auto_save: false,
            ..Default::default()
        };

        let agent = AgentLoop::with_system_prompt(
            config,
            tools,
            llm,
            Some(profile.system_prompt.clone()),
        );

        Self { profile, agent }
    }

    pub fn session_id(&self) -> String {
        self.agent.session_id().to_string()
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.agent.tools()
    }

    pub async fn run(&mut self, task: &str) -> SubAgentResult {
        let start = Instant::now();
        let output = self.agent.run(task, None).await;
        let duration = start.elapsed().as_secs_f64();

        // run() reports transport failures as a diagnostic string
        let failed = output.starts_with("(Error:");

        SubAgentResult {
            agent_name:       self.profile.name.clone(),
            task:             task.to_string(),
            success:          !failed,
            output:           if failed { String::new() } else { output.clone() },
            error:            if failed { Some(output) } else { None },
            iterations:       self.agent.iteration_count(),
            tokens_used:      self.agent.total_usage().total(),
            duration_seconds: duration,
            session_id:       Some(self.agent.session_id().to_string()),
        }
    }
}

/// A spawn request for the parallel path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnSpec {
    pub agent_name: String,
    pub task:       String,
}

/// Spawns and tracks sub-executors, sequentially or in parallel.
pub struct SubAgentOrchestrator {
    tools:       ToolRegistry,
    working_dir: PathBuf,
    max_workers: usize,
    registry:    SubAgentRegistry,
    llm_factory: LlmFactory,

    active:  tokio::sync::Mutex<HashMap<String, SubAgent>>,
    results: std::sync::Mutex<Vec<SubAgentResult>>,
}

impl SubAgentOrchestrator {
    pub fn new(
        tools: ToolRegistry,
        working_dir: impl Into<PathBuf>,
        llm_factory: LlmFactory,
    ) -> Self {
        Self {
            tools,
            working_dir: working_dir.into(),
            max_workers: 4,
            registry: SubAgentRegistry::new(),
            llm_factory,
            active: tokio::sync::Mutex::new(HashMap::new()),
            results: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn registry(&self) -> &SubAgentRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SubAgentRegistry {
        &mut self.registry
    }

    /// Spawn and run one sub-executor to completion. Unknown profiles
    /// and internal failures become `success=false` results, never
    /// panics.
    pub async fn spawn(&self, agent_name: &str, task: &str) -> SubAgentResult {
        let Some(profile) = self.registry.get(agent_name).cloned() else {
            return SubAgentResult::failure(
                agent_name,
                task,
                format!(
                    "Unknown agent type: {}. Available: {:?}",
                    agent_name,
                    self.registry.names()
                ),
            );
        };

        tracing::info!(agent = %agent_name, "spawning sub-executor");
        let llm = (self.llm_factory)(&profile);
        let mut sub_agent =
            SubAgent::new(profile, &self.tools, self.working_dir.clone(), llm);

        let result = sub_agent.run(task).await;

        self.results.lock().unwrap().push(result.clone());
        if let Some(session_id) = &result.session_id {
            self.active.lock().await.insert(session_id.clone(), sub_agent);
        }

        result
    }

    /// Spawn multiple sub-executors on a bounded worker pool. Results
    /// come back in completion order; a worker failure becomes a
    /// `success=false` result rather than propagating.
    pub async fn spawn_parallel(self: &Arc<Self>, specs: Vec<SpawnSpec>) -> Vec<SubAgentResult> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_workers));
        let mut join_set = tokio::task::JoinSet::new();

        for spec in specs {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = this.spawn(&spec.agent_name, &spec.task).await;
                (spec, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_spec, result)) => results.push(result),
                Err(e) => {
                    results.push(SubAgentResult::failure("unknown", "", e.to_string()));
                }
            }
        }
        results
    }

    /// Resume a previous sub-executor session with a follow-up task.
    pub async fn resume(&self, session_id: &str, task: &str) -> Option<SubAgentResult> {
        let mut active = self.active.lock().await;
        let sub_agent = active.get_mut(session_id)?;
        let result = sub_agent.run(task).await;
        self.results.lock().unwrap().push(result.clone());
        Some(result)
    }

    /// History of all sub-executor executions.
    pub fn history(&self) -> Vec<SubAgentResult> {
        self.results.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, MockLlm};

    fn mock_factory(text: &'static str) -> LlmFactory {
        Arc::new(move |_profile| {
            Arc::new(MockLlm::new(vec![ChatResponse::text(text)])) as Arc<dyn LlmClient>
        })
    }

    #[tokio::test]
    async fn test_unknown_profile_is_failure_result() {
        let orch = SubAgentOrchestrator::new(
            ToolRegistry::new(),
            std::env::temp_dir(),
            mock_factory("unused"),
        );
        let result = orch.spawn("nope", "do something").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Unknown agent type"));
    }

    #[tokio::test]
    async fn test_spawn_runs_profile() {
        let orch = SubAgentOrchestrator::new(
            crate::tools::build_registry(std::env::temp_dir()),
            std::env::temp_dir(),
            mock_factory("explored the code"),
        );
        let result = orch.spawn("explore", "find the config").await;
        assert!(result.success);
        assert_eq!(result.output, "explored the code");
        assert_eq!(result.agent_name, "explore");
        assert!(result.session_id.is_some());
        assert_eq!(orch.history().len(), 1);
    }

    #[tokio::test]
    async fn test_default_registry_has_all_profiles() {
        let registry = SubAgentRegistry::new();
        for name in ["explore", "debug", "research", "plan", "general", "reviewer", "verifier"] {
            assert!(registry.get(name).is_some(), "missing profile {}", name);
        }
    }
}
