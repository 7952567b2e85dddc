//! The LLM adapter consumed by the ObservationPipeline (E) and
//! ChannelObserver pipeline (G): a synchronous function from
//! `(system_prompt, user_prompt)` to a completion string. Modeled as an async
//! trait the way `warden-channels::ChatAdapter` and `warden-agent`'s
//! subprocess transport are, since every call site here already runs on
//! the Tokio runtime; no concrete provider lives in this workspace.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}
