use serde::{Deserialize, Serialize};

/// One card the watcher is actively driving through an agent turn (spec
/// §3.7). Transient — cleared once the card's worker finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedCard {
    pub card_id: String,
    pub card_name: String,
    pub card_url: String,
    pub list_id: String,
    pub list_key: String,
    pub thread_ts: String,
    pub channel_id: String,
    pub detected_at: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub has_execute: bool,
    #[serde(default)]
    pub dm_thread_ts: Option<String>,
}

/// Persistent thread_ts ↔ card mapping used for reaction-based resume after
/// the worker completes and the `TrackedCard` is cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadCardInfo {
    pub thread_ts: String,
    pub card_id: String,
    pub card_name: String,
    pub list_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListRunStatus {
    Pending,
    Running,
    Paused,
    Verifying,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardOutcome {
    Completed,
    Failed,
    Skipped,
    SkippedDuplicate,
}

/// One in-progress run over an ordered list of cards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRunSession {
    pub session_id: String,
    pub list_id: String,
    pub list_name: String,
    pub card_ids: Vec<String>,
    pub current_index: usize,
    pub status: ListRunStatus,
    #[serde(default)]
    pub processed_cards: std::collections::HashMap<String, CardOutcome>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: String,
}

impl ListRunSession {
    pub fn new(session_id: impl Into<String>, list_id: impl Into<String>, list_name: impl Into<String>, card_ids: Vec<String>) -> Self {
        Self {
            session_id: session_id.into(),
            list_id: list_id.into(),
            list_name: list_name.into(),
            card_ids,
            current_index: 0,
            status: ListRunStatus::Pending,
            processed_cards: std::collections::HashMap::new(),
            error_message: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, ListRunStatus::Running | ListRunStatus::Paused | ListRunStatus::Verifying)
    }

    pub fn is_complete(&self) -> bool {
        self.card_ids.iter().all(|id| self.processed_cards.contains_key(id))
    }
}

/// A card fetched from the tracker adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub name: String,
    pub desc: String,
    pub url: String,
    pub list_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub due_complete: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_run_session_completes_only_when_all_cards_processed() {
        let mut session = ListRunSession::new("S1", "L1", "To Go", vec!["c1".into(), "c2".into()]);
        assert!(!session.is_complete());
        session.processed_cards.insert("c1".into(), CardOutcome::Completed);
        assert!(!session.is_complete());
        session.processed_cards.insert("c2".into(), CardOutcome::Failed);
        assert!(session.is_complete());
    }
}
