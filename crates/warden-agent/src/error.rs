use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent subprocess: {0}")]
    Spawn(String),

    #[error("usage limit reached")]
    UsageLimit,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Spawn(_) => "agent.spawn_failed",
            AgentError::UsageLimit => "agent.usage_limit",
            AgentError::Io(_) => "agent.io",
            AgentError::Serialization(_) => "agent.serialization",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
