use thiserror::Error;

/// Error taxonomy shared across every Warden crate.
///
/// Each class maps to a short, localized, user-safe message; raw stack
/// traces never reach chat. `code()` gives a stable machine-readable tag
/// for logs and the dashboard REST surface.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("usage limit reached; try again shortly")]
    UsageLimit,

    #[error("authentication error")]
    Auth,

    #[error("network error; retrying")]
    Network(String),

    #[error("store corrupted at {path}: {reason}")]
    StoreCorruption { path: String, reason: String },

    #[error("stale state reclaimed: {0}")]
    StaleState(String),

    #[error("deploy blocked: {0} session(s) still running")]
    DeployBlocked(usize),

    #[error("supervisor restart required")]
    SupervisorRestartRequired,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Generic(String),
}

impl WardenError {
    /// Short error code — stable across releases, safe to expose externally.
    pub fn code(&self) -> &'static str {
        match self {
            WardenError::Config(_) => "CONFIG_ERROR",
            WardenError::UsageLimit => "USAGE_LIMIT",
            WardenError::Auth => "AUTH_ERROR",
            WardenError::Network(_) => "NETWORK_ERROR",
            WardenError::StoreCorruption { .. } => "STORE_CORRUPTION",
            WardenError::StaleState(_) => "STALE_STATE",
            WardenError::DeployBlocked(_) => "DEPLOY_BLOCKED",
            WardenError::SupervisorRestartRequired => "SUPERVISOR_RESTART_REQUIRED",
            WardenError::Serialization(_) => "SERIALIZATION_ERROR",
            WardenError::Io(_) => "IO_ERROR",
            WardenError::Generic(_) => "INTERNAL_ERROR",
        }
    }

    /// The short, user-facing message H/K compose into a chat reply, with
    /// the distinguishing emoji
    pub fn user_message(&self) -> String {
        match self {
            WardenError::UsageLimit => self.to_string(),
            WardenError::Auth => self.to_string(),
            WardenError::Network(_) => self.to_string(),
            other => format!("⚠️ {other}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
