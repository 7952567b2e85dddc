pub mod atomic_fs;
pub mod config;
pub mod error;
pub mod llm;
pub mod tokens;
pub mod types;

pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use llm::LlmAdapter;
pub use types::{ConnId, Role, SourceType, UserId};
