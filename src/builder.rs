use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::{AgentConfig, AgentLoop};
use crate::error::EngineError;
use crate::llm::{AnthropicClient, LlmClient, OpenAiClient, RetryingLlm};
use crate::skills::SkillSet;
use crate::tools::{build_registry_with_skills, Tool, ToolRegistry};

/// Ergonomic construction of an [`AgentLoop`].
///
/// ```no_run
/// # use taskforge::AgentBuilder;
/// # async fn demo() {
/// let mut agent = AgentBuilder::new("/tmp/project")
///     .anthropic("")                       // ANTHROPIC_API_KEY from env
///     .model("claude-sonnet-4-20250514")
///     .max_iterations(50)
///     .retry_on_error(3)
///     .build()
///     .unwrap();
/// let answer = agent.run("Summarize the repo layout", None).await;
/// # }
/// ```
pub struct AgentBuilder {
    config:        AgentConfig,
    llm:           Option<Arc<dyn LlmClient>>,
    tools:         Option<ToolRegistry>,
    extra_tools:   Vec<Arc<dyn Tool>>,
    skills:        Option<Arc<SkillSet>>,
    system_prompt: Option<String>,
    retry_count:   Option<u32>,
}

impl AgentBuilder {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let config = AgentConfig { working_dir: working_dir.into(), ..Default::default() };
        Self {
            config,
            llm: None,
            tools: None,
            extra_tools: Vec::new(),
            skills: None,
            system_prompt: None,
            retry_count: None,
        }
    }

    // ── LLM provider setters ──────────────────────────────────────────────

    /// Set the LLM client explicitly: the escape hatch for providers not
    /// covered by the convenience methods.
    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Use the Anthropic API (Claude models). Reads `ANTHROPIC_API_KEY`
    /// from the environment if you pass `""`.
    pub fn anthropic(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        let client = if key.is_empty() {
            AnthropicClient::from_env(self.config.model.as_str()).ok()
        } else {
            Some(AnthropicClient::new(key, self.config.model.as_str()))
        };
        // Missing key surfaces at build() as "LLM client is required"
        if let Some(client) = client {
            let client = client
                .with_temperature(self.config.temperature)
                .with_max_tokens(self.config.max_tokens)
                .with_reasoning_effort(self.config.reasoning_effort.clone());
            self.llm = Some(Arc::new(client));
        }
        self
    }

    /// Use the standard OpenAI API (`OPENAI_API_KEY` from env).
    pub fn openai(mut self) -> Self {
        self.llm = Some(Arc::new(
            OpenAiClient::new(self.config.model.as_str())
                .with_temperature(self.config.temperature as f32),
        ));
        self
    }

    /// Any OpenAI-compatible endpoint (Groq, Ollama, Together, ...).
    pub fn openai_compatible(
        mut self,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        self.llm = Some(Arc::new(
            OpenAiClient::with_base_url(api_base, api_key, self.config.model.as_str())
                .with_temperature(self.config.temperature as f32),
        ));
        self
    }

    /// Wrap the current LLM client with automatic retry on transient
    /// errors. Call **after** a provider method.
    pub fn retry_on_error(mut self, n: u32) -> Self {
        self.retry_count = Some(n);
        self
    }

    // ── Configuration ─────────────────────────────────────────────────────

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.config.temperature = temperature;
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.config.max_iterations = n;
        self
    }

    pub fn reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.config.reasoning_effort = effort.into();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn auto_save(mut self, auto_save: bool) -> Self {
        self.config.auto_save = auto_save;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Caller-provided system prompt; wins over the built-in composition.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    // ── Tools & skills ────────────────────────────────────────────────────

    /// Replace the atomic registry wholesale.
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Register an extra tool on top of the atomic set.
    pub fn add_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    pub fn skills(mut self, skills: Arc<SkillSet>) -> Self {
        self.skills = Some(skills);
        self
    }

    // ── Build ─────────────────────────────────────────────────────────────

    pub fn build(self) -> Result<AgentLoop, EngineError> {
        let mut llm = self.llm.ok_or_else(|| {
            EngineError::Build(
                "LLM client is required. Use .anthropic(), .openai(), \
                 .openai_compatible(), or .llm()"
                    .to_string(),
            )
        })?;

        if let Some(n) = self.retry_count {
            llm = Arc::new(RetryingLlm::new(llm, n));
        }

        let mut tools = self
            .tools
            .unwrap_or_else(|| {
                build_registry_with_skills(&self.config.working_dir, self.skills.clone())
            });
        for tool in self.extra_tools {
            tools.register(tool);
        }

        let mut agent =
            AgentLoop::with_system_prompt(self.config, tools, llm, self.system_prompt);
        if let Some(skills) = self.skills {
            agent = agent.with_skills(skills);
        }
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, MockLlm};

    #[test]
    fn test_build_requires_llm() {
        let err = AgentBuilder::new("/tmp").build().unwrap_err();
        assert!(err.to_string().contains("LLM client is required"));
    }

    #[test]
    fn test_build_with_mock() {
        let agent = AgentBuilder::new(std::env::temp_dir())
            .llm(Arc::new(MockLlm::new(vec![ChatResponse::text("ok")])))
            .max_iterations(5)
            .build()
            .unwrap();
        assert_eq!(agent.config.max_iterations, 5);
        assert!(agent.tools().has("bash"));
        assert!(agent.tools().has("todo"));
    }
}
