use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("process already registered: {0}")]
    AlreadyRegistered(String),
    #[error("process not registered: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
