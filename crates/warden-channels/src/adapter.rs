use async_trait::async_trait;

use crate::error::ChannelError;

/// Surface a chat platform must implement to be driven by H/G/I.
/// No specific provider is assumed — Slack, Discord, a test double, etc. can
/// all implement this.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<String, ChannelError>;

    async fn update_message(&self, channel: &str, ts: &str, text: &str) -> Result<(), ChannelError>;

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ChannelError>;

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ChannelError>;

    async fn open_dm(&self, user: &str) -> Result<String, ChannelError>;
}
