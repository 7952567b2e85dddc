//! Component K — ReactionManager.

use std::sync::Arc;

use crate::adapter::ChatAdapter;
use crate::error::Result;

pub const PREEMPT_EMOJI: &str = "hourglass_flowing_sand";
pub const ACCEPTED_EMOJI: &str = "white_check_mark";

pub const TRELLO_PLANNING_EMOJI: &str = "thinking_face";
pub const TRELLO_EXECUTING_EMOJI: &str = "gear";
pub const TRELLO_SUCCESS_EMOJI: &str = "white_check_mark";
pub const TRELLO_ERROR_EMOJI: &str = "x";

pub struct ReactionManager {
    chat: Arc<dyn ChatAdapter>,
}

impl ReactionManager {
    pub fn new(chat: Arc<dyn ChatAdapter>) -> Self {
        Self { chat }
    }

    pub async fn add(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.chat.add_reaction(channel, ts, name).await
    }

    pub async fn remove(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.chat.remove_reaction(channel, ts, name).await
    }

    /// Swap the preemption hourglass for the accepted checkmark once a
    /// stashed `PendingPrompt` has been re-entered.
    pub async fn swap_preempt_to_accepted(&self, channel: &str, ts: &str) -> Result<()> {
        let _ = self.remove(channel, ts, PREEMPT_EMOJI).await;
        self.add(channel, ts, ACCEPTED_EMOJI).await
    }

    pub async fn set_trello_state(&self, channel: &str, ts: &str, prior: Option<&str>, next: &str) -> Result<()> {
        if let Some(prior) = prior {
            let _ = self.remove(channel, ts, prior).await;
        }
        self.add(channel, ts, next).await
    }
}
