use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Build error: {0}")]
    Build(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Circular dependency detected: {0}")]
    CycleDetected(String),

    #[error("Unknown dependency '{dep}' referenced by task '{task}'")]
    UnknownDependency { task: String, dep: String },

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
