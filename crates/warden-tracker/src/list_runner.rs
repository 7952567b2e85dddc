//! Component I — ListRunner.

use std::sync::Arc;

use tracing::warn;
use warden_agent::{AgentRunner, RunOptions};

use crate::adapter::TrackerAdapter;
use crate::error::{Result, TrackerError};
use crate::store::TrackerStore;
use crate::types::{Card, CardOutcome, ListRunSession, ListRunStatus};

pub struct ListRunner {
    store: Arc<TrackerStore>,
}

impl ListRunner {
    pub fn new(store: Arc<TrackerStore>) -> Self {
        Self { store }
    }

    pub async fn create_session(&self, list_id: &str, list_name: &str, card_ids: Vec<String>) -> Result<ListRunSession> {
        let session = ListRunSession::new(uuid::Uuid::new_v4().to_string(), list_id, list_name, card_ids);
        self.store.save_list_run_session(session.clone()).await?;
        Ok(session)
    }

    /// Resolve `<!-- LIST_RUN: <list name> -->` (H, admin-only) to a list_id
    /// via the tracker adapter and start a fresh run over its cards.
    pub async fn start_by_name(&self, list_name: &str, tracker: &dyn TrackerAdapter) -> Result<ListRunSession> {
        if let Some(existing) = self.find_session_by_list_name(list_name).await? {
            if existing.is_active() {
                return Err(TrackerError::InvalidTransition {
                    session_id: existing.session_id,
                    reason: format!("a list run is already active for \"{list_name}\""),
                });
            }
        }
        let lists = tracker.get_lists().await?;
        let list = lists
            .into_iter()
            .find(|l| l.name.eq_ignore_ascii_case(list_name))
            .ok_or_else(|| TrackerError::Adapter(format!("no tracker list named \"{list_name}\"")))?;
        let cards = tracker.get_cards_in_list(&list.id).await?;
        let card_ids: Vec<String> = cards.iter().map(|c| c.id.clone()).collect();
        self.create_session(&list.id, &list.name, card_ids).await
    }

    /// Next not-yet-processed card id from `card_ids[current_index:]`.
    pub fn process_next_card(&self, session: &ListRunSession) -> Option<String> {
        session
            .card_ids
            .iter()
            .skip(session.current_index)
            .find(|id| !session.processed_cards.contains_key(*id))
            .cloned()
    }

    /// Execute the next card: build a prompt from its body plus progress
    /// context, run it via `agent`, optionally validate with a second pass
    /// looking for `VALIDATION_RESULT: PASS|FAIL`, and advance the session.
    pub async fn run_next_card(
        &self,
        mut session: ListRunSession,
        tracker: &dyn TrackerAdapter,
        agent: &AgentRunner,
        validate: bool,
    ) -> Result<ListRunSession> {
        let Some(card_id) = self.process_next_card(&session) else {
            session.status = ListRunStatus::Completed;
            self.store.save_list_run_session(session.clone()).await?;
            return Ok(session);
        };

        let card = tracker.get_card(&card_id).await?;
        session.status = ListRunStatus::Running;

        let outcome = self.execute_card(&session, &card, agent).await;
        let outcome = match outcome {
            Ok(text) if validate => self.validate_card(&session, &card, &text, agent).await,
            Ok(_) => CardOutcome::Completed,
            Err(e) => {
                warn!(card_id = %card_id, error = %e, "list-run card execution failed");
                CardOutcome::Failed
            }
        };

        session.processed_cards.insert(card_id.clone(), outcome);
        session.current_index += 1;
        if outcome == CardOutcome::Failed {
            session.status = ListRunStatus::Failed;
            session.error_message = Some(format!("card {card_id} failed"));
        } else if session.is_complete() {
            session.status = ListRunStatus::Completed;
        }

        self.store.save_list_run_session(session.clone()).await?;
        Ok(session)
    }

    async fn execute_card(&self, session: &ListRunSession, card: &Card, agent: &AgentRunner) -> Result<String> {
        let prompt = format!(
            "Card {}/{}: {}\n\n{}",
            session.current_index + 1,
            session.card_ids.len(),
            card.name,
            card.desc
        );
        let opts = RunOptions {
            prompt,
            session_id: None,
            user_id: None,
            thread_ts: format!("list-run-{}", session.session_id),
            channel: String::new(),
        };
        let result = agent
            .run(opts, |_| async {}, |_, _| async {}, |_| async {})
            .await
            .map_err(|e| TrackerError::Adapter(e.to_string()))?;
        if !result.success {
            return Err(TrackerError::Adapter(result.error.unwrap_or_else(|| "agent run failed".into())));
        }
        Ok(result.output)
    }

    async fn validate_card(&self, session: &ListRunSession, card: &Card, prior_output: &str, agent: &AgentRunner) -> CardOutcome {
        let prompt = format!(
            "Verify the following work on card \"{}\" was actually completed correctly:\n\n{}\n\nRespond with a line starting VALIDATION_RESULT: PASS or VALIDATION_RESULT: FAIL.",
            card.name, prior_output
        );
        let opts = RunOptions {
            prompt,
            session_id: None,
            user_id: None,
            thread_ts: format!("list-run-validate-{}", session.session_id),
            channel: String::new(),
        };
        match agent.run(opts, |_| async {}, |_, _| async {}, |_| async {}).await {
            Ok(result) if result.output.contains("VALIDATION_RESULT: PASS") => CardOutcome::Completed,
            Ok(_) => CardOutcome::Failed,
            Err(e) => {
                warn!(error = %e, "validation pass errored; treating card as failed");
                CardOutcome::Failed
            }
        }
    }

    pub async fn pause_run(&self, session_id: &str, reason: &str) -> Result<ListRunSession> {
        let mut session = self.get(session_id).await?;
        if !session.is_active() {
            return Err(TrackerError::InvalidTransition {
                session_id: session_id.to_string(),
                reason: format!("cannot pause from {:?}", session.status),
            });
        }
        session.status = ListRunStatus::Paused;
        session.error_message = Some(reason.to_string());
        self.store.save_list_run_session(session.clone()).await?;
        Ok(session)
    }

    pub async fn resume_run(&self, session_id: &str) -> Result<ListRunSession> {
        let mut session = self.get(session_id).await?;
        if session.status != ListRunStatus::Paused {
            return Err(TrackerError::InvalidTransition {
                session_id: session_id.to_string(),
                reason: "can only resume from paused".to_string(),
            });
        }
        session.status = ListRunStatus::Running;
        self.store.save_list_run_session(session.clone()).await?;
        Ok(session)
    }

    pub async fn get_paused_sessions(&self) -> Result<Vec<ListRunSession>> {
        Ok(self.store.load_list_run_sessions().await?.into_iter().filter(|s| s.status == ListRunStatus::Paused).collect())
    }

    pub async fn find_session_by_list_name(&self, name: &str) -> Result<Option<ListRunSession>> {
        Ok(self.store.load_list_run_sessions().await?.into_iter().find(|s| s.list_name == name))
    }

    pub async fn get_active_sessions(&self) -> Result<Vec<ListRunSession>> {
        Ok(self.store.load_list_run_sessions().await?.into_iter().filter(|s| s.is_active()).collect())
    }

    async fn get(&self, session_id: &str) -> Result<ListRunSession> {
        self.store
            .load_list_run_sessions()
            .await?
            .into_iter()
            .find(|s| s.session_id == session_id)
            .ok_or_else(|| TrackerError::SessionNotFound { list_id: session_id.to_string() })
    }
}
