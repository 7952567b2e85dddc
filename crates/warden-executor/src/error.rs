use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no session for thread {0}")]
    SessionNotFound(String),
    #[error("agent error: {0}")]
    Agent(String),
    #[error("chat adapter error: {0}")]
    Chat(String),
    #[error("tracker error: {0}")]
    Tracker(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
