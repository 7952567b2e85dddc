use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker adapter error: {0}")]
    Adapter(String),

    #[error("no card {card_id} tracked")]
    CardNotTracked { card_id: String },

    #[error("no list-run session found for list {list_id}")]
    SessionNotFound { list_id: String },

    #[error("invalid transition for list-run session {session_id}: {reason}")]
    InvalidTransition { session_id: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
