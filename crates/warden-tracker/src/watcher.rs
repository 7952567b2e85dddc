//! Component I — TrackerWatcher poll loop.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use warden_channels::ChatAdapter;
use warden_core::Role;

use crate::adapter::TrackerAdapter;
use crate::error::Result;
use crate::list_runner::ListRunner;
use crate::runner_port::TurnRunner;
use crate::store::TrackerStore;
use crate::types::{ThreadCardInfo, TrackedCard};

const STALE_THRESHOLD_SECS: i64 = 2 * 60 * 60;
const RUN_LIST_LABEL: &str = "🏃 Run List";
const IN_PROGRESS_PREFIX: &str = "🌀 ";

pub struct WatcherConfig {
    pub watch_lists: Vec<(String, String)>, // (list_key, list_id), e.g. ("to_go", "abc123")
    pub in_progress_list_id: String,
    pub review_list_id: String,
    pub done_list_id: String,
    pub operational_list_ids: HashSet<String>,
    /// Chat channel a new card's work thread is opened in. Distinct from any
    /// Trello list id — those never double as a chat channel.
    pub notify_channel_id: String,
}

pub struct TrackerWatcher {
    tracker: Arc<dyn TrackerAdapter>,
    store: Arc<TrackerStore>,
    runner: Arc<dyn TurnRunner>,
    list_runner: Arc<ListRunner>,
    chat: Arc<dyn ChatAdapter>,
    config: WatcherConfig,
    list_run_lock: Mutex<()>,
}

impl TrackerWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker: Arc<dyn TrackerAdapter>,
        store: Arc<TrackerStore>,
        runner: Arc<dyn TurnRunner>,
        list_runner: Arc<ListRunner>,
        chat: Arc<dyn ChatAdapter>,
        config: WatcherConfig,
    ) -> Self {
        Self { tracker, store, runner, list_runner, chat, config, list_run_lock: Mutex::new(()) }
    }

    /// One tick of the poll loop. Intended to be called on `poll_interval`.
    pub async fn tick(&self) {
        self.reclaim_stale().await;
        self.detect_new_cards().await;
        self.check_review_completion().await;
        self.check_run_list_trigger().await;
    }

    /// Stale reclamation: tracked cards older than 2h are untracked.
    async fn reclaim_stale(&self) {
        let Ok(cards) = self.store.load_tracked_cards().await else { return };
        let now = Utc::now();
        for card in cards {
            if is_stale(&card.detected_at, now) {
                warn!(card_id = %card.card_id, "reclaiming stale tracked card");
                let _ = self.store.remove_tracked_card(&card.card_id).await;
            }
        }
    }

    /// New-card detection for each watched list.
    async fn detect_new_cards(&self) {
        for (list_key, list_id) in &self.config.watch_lists {
            let Ok(cards) = self.tracker.get_cards_in_list(list_id).await else { continue };
            let tracked: HashSet<String> = self
                .store
                .load_tracked_cards()
                .await
                .unwrap_or_default()
                .into_iter()
                .map(|c| c.card_id)
                .collect();
            for card in cards {
                if tracked.contains(&card.id) {
                    continue;
                }
                self.handle_new_card(list_key, &card.id, &card.name, &card.url, list_id).await;
            }
        }
    }

    async fn handle_new_card(&self, list_key: &str, card_id: &str, card_name: &str, card_url: &str, list_id: &str) {
        let channel_id = self.config.notify_channel_id.clone();
        let opening = format!("🔧 New tracker card:\n{card_name}\n{card_url}");
        let thread_ts = match self.chat.post_message(&channel_id, &opening, None).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(card_id, error = %e, "failed to open a chat thread for new card");
                return;
            }
        };

        if let Err(e) = self.tracker.move_card(card_id, &self.config.in_progress_list_id).await {
            warn!(card_id, error = %e, "failed to move card to in_progress");
            return;
        }
        let prefixed = format!("{IN_PROGRESS_PREFIX}{card_name}");
        let _ = self.tracker.update_card_name(card_id, &prefixed).await;

        let tracked = TrackedCard {
            card_id: card_id.to_string(),
            card_name: card_name.to_string(),
            card_url: card_url.to_string(),
            list_id: list_id.to_string(),
            list_key: list_key.to_string(),
            thread_ts: thread_ts.clone(),
            channel_id: channel_id.clone(),
            detected_at: Utc::now().to_rfc3339(),
            session_id: None,
            has_execute: true,
            dm_thread_ts: None,
        };
        if let Err(e) = self.store.upsert_tracked_card(tracked).await {
            warn!(card_id, error = %e, "failed to persist tracked card");
        }
        let _ = self
            .store
            .upsert_thread_card(ThreadCardInfo {
                thread_ts: thread_ts.clone(),
                card_id: card_id.to_string(),
                card_name: card_name.to_string(),
                list_id: list_id.to_string(),
            })
            .await;

        let prompt = format!("New tracker card:\n{card_name}\n{card_url}");
        let outcome = self.runner.run_turn(&thread_ts, &channel_id, &prompt, Role::Admin, None).await;
        if !outcome.success {
            warn!(card_id, "card worker turn did not succeed");
        }

        let _ = self.tracker.update_card_name(card_id, card_name).await;
        let _ = self.store.remove_tracked_card(card_id).await;
    }

    /// Review completion: cards in review with `due_complete` move to done.
    async fn check_review_completion(&self) {
        let Ok(cards) = self.tracker.get_cards_in_list(&self.config.review_list_id).await else { return };
        for card in cards {
            if card.due_complete == Some(true) {
                if let Err(e) = self.tracker.move_card(&card.id, &self.config.done_list_id).await {
                    warn!(card_id = %card.id, error = %e, "failed to move completed review card to done");
                    continue;
                }
                info!(card_id = %card.id, "card marked done after review completion");
            }
        }
    }

    /// Run-list trigger: first card of a non-operational list carrying the
    /// run-list label starts a chained ListRunSession.
    async fn check_run_list_trigger(&self) {
        let _guard = self.list_run_lock.lock().await;
        let Ok(lists) = self.tracker.get_lists().await else { return };
        for list in lists {
            if self.config.operational_list_ids.contains(&list.id) {
                continue;
            }
            let Ok(cards) = self.tracker.get_cards_in_list(&list.id).await else { continue };
            let Some(first) = cards.first() else { continue };
            if !first.labels.iter().any(|l| l == RUN_LIST_LABEL) {
                continue;
            }
            if self.list_runner.find_session_by_list_name(&list.name).await.ok().flatten().map(|s| s.is_active()).unwrap_or(false) {
                continue;
            }
            // Attempt the label removal first; skip and retry next tick on failure.
            if self.tracker.remove_label_from_card(&first.id, RUN_LIST_LABEL).await.is_err() {
                continue;
            }
            let card_ids: Vec<String> = cards.iter().map(|c| c.id.clone()).collect();
            match self.list_runner.create_session(&list.id, &list.name, card_ids).await {
                Ok(session) => {
                    info!(list_id = %list.id, session_id = %session.session_id, "started list run");
                    for card in &cards {
                        let _ = self
                            .store
                            .upsert_tracked_card(TrackedCard {
                                card_id: card.id.clone(),
                                card_name: card.name.clone(),
                                card_url: card.url.clone(),
                                list_id: list.id.clone(),
                                list_key: "list_run".to_string(),
                                thread_ts: session.session_id.clone(),
                                channel_id: String::new(),
                                detected_at: Utc::now().to_rfc3339(),
                                session_id: Some(session.session_id.clone()),
                                has_execute: true,
                                dm_thread_ts: None,
                            })
                            .await;
                    }
                }
                Err(e) => warn!(list_id = %list.id, error = %e, "failed to start list run"),
            }
        }
    }
}

fn is_stale(detected_at: &str, now: DateTime<Utc>) -> bool {
    let Ok(detected) = DateTime::parse_from_rfc3339(detected_at) else { return false };
    now.signed_duration_since(detected.with_timezone(&Utc)).num_seconds() > STALE_THRESHOLD_SECS
}

pub fn default_operational_lists(watch_list_ids: &[String], in_progress: &str, review: &str, done: &str, backlog: &str, blocked: &str, draft: &str) -> HashSet<String> {
    let mut set: HashSet<String> = watch_list_ids.iter().cloned().collect();
    for id in [in_progress, review, done, backlog, blocked, draft] {
        set.insert(id.to_string());
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_detection_respects_two_hour_threshold() {
        let now = Utc::now();
        let fresh = (now - chrono::Duration::minutes(30)).to_rfc3339();
        let stale = (now - chrono::Duration::hours(3)).to_rfc3339();
        assert!(!is_stale(&fresh, now));
        assert!(is_stale(&stale, now));
    }
}
