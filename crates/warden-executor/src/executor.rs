//! Component H — SessionExecutor: the per-turn orchestration that ties B, C,
//! D, F, K and (optionally) I together.
//!
//! One `process_turn` call is the whole 8-step flow: try the thread's
//! re-entrant lock; if another turn holds it, stash this prompt and fire a
//! best-effort interrupt rather than queueing behind it; otherwise mark the
//! session running, assemble the memory prefix, run the agent, apply
//! whatever marker the output carries, hand the turn to the observation
//! pipeline, then release the lock and — if a prompt arrived while this one
//! was running — immediately re-enter with it.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, instrument, warn};
use warden_agent::{AgentRunner, RunOptions, RunResult};
use warden_channels::{ChatAdapter, ReactionManager};
use warden_core::{Role, SourceType};
use warden_memory::{ContextBuilder, ContextParams, ConversationTurn, MemoryStore, ObservationPipeline};
use warden_sessions::{LockToken, SessionManager};
use warden_tracker::{ListRunner, TrackerAdapter, TurnOutcome, TurnRunner};

use crate::marker::{find_marker, strip_markers, Marker};
use crate::types::{PendingPrompt, ToolPolicy};

pub struct SessionExecutorConfig {
    pub agent_binary: String,
    pub log_dir: String,
    pub mcp_bridge_path: Option<String>,
    pub admin_tools: Vec<String>,
    pub max_context_tokens: u32,
    pub operator_thread_ts: Option<String>,
}

pub struct SessionExecutor {
    sessions: Arc<SessionManager>,
    memory: Arc<MemoryStore>,
    observer: Arc<ObservationPipeline>,
    chat: Arc<dyn ChatAdapter>,
    reactions: ReactionManager,
    tracker: Arc<dyn TrackerAdapter>,
    list_runner: Arc<ListRunner>,
    registry: Arc<warden_agent::RunnerRegistry>,
    config: SessionExecutorConfig,
    pending: DashMap<String, PendingPrompt>,
}

impl SessionExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionManager>,
        memory: Arc<MemoryStore>,
        observer: Arc<ObservationPipeline>,
        chat: Arc<dyn ChatAdapter>,
        tracker: Arc<dyn TrackerAdapter>,
        list_runner: Arc<ListRunner>,
        registry: Arc<warden_agent::RunnerRegistry>,
        config: SessionExecutorConfig,
    ) -> Self {
        let reactions = ReactionManager::new(chat.clone());
        Self { sessions, memory, observer, chat, reactions, tracker, list_runner, registry, config, pending: DashMap::new() }
    }

    fn build_runner(&self, role: Role) -> AgentRunner {
        let policy = ToolPolicy::for_role(role, &self.config.admin_tools);
        AgentRunner::new(self.config.agent_binary.clone(), self.config.log_dir.clone(), self.registry.clone())
            .with_allowed_tools(policy.allowed_tools)
            .with_mcp_bridge(self.config.mcp_bridge_path.clone())
    }

    /// Entry point for a newly-arrived message. Never blocks on another
    /// turn in the same thread — either runs immediately or stashes and
    /// interrupts.
    #[instrument(skip(self, prompt), fields(thread_ts))]
    pub async fn process_turn(
        &self,
        thread_ts: &str,
        channel_id: &str,
        prompt: &str,
        msg_ts: &str,
        role: Role,
        source_type: SourceType,
        user_id: &str,
        username: &str,
    ) {
        let session = self.sessions.get_or_create(thread_ts, channel_id, user_id, username, role, source_type);
        let lock = self.sessions.get_session_lock(thread_ts);
        let token = LockToken::new();

        let Some(guard) = lock.try_acquire(token) else {
            self.pending.insert(
                thread_ts.to_string(),
                PendingPrompt { prompt: prompt.to_string(), msg_ts: msg_ts.to_string(), role, session_id: session.session_id.clone() },
            );
            let _ = self.reactions.add(channel_id, msg_ts, warden_channels::reactions::PREEMPT_EMOJI).await;
            self.registry.interrupt(thread_ts);
            info!(thread_ts, "turn preempted an in-flight run; stashed and interrupted");
            return;
        };

        // Hold the same guard across any immediate re-entries triggered by a
        // prompt that arrived mid-run: it's the same chain continuing, not a
        // fresh contender for the lock.
        let mut current = (prompt.to_string(), msg_ts.to_string(), role, session.session_id.clone());
        loop {
            let (prompt, msg_ts, role, session_id) = current;
            self.run_locked(thread_ts, channel_id, prompt, &msg_ts, role, session_id).await;

            match self.pending.remove(thread_ts) {
                Some((_, next)) => {
                    let _ = self.reactions.swap_preempt_to_accepted(channel_id, &next.msg_ts).await;
                    let session_id = self.sessions.get(thread_ts).and_then(|s| s.session_id);
                    current = (next.prompt, next.msg_ts, next.role, session_id);
                }
                None => break,
            }
        }
        drop(guard);
    }

    async fn run_locked(
        &self,
        thread_ts: &str,
        channel_id: &str,
        prompt: String,
        msg_ts: &str,
        role: Role,
        session_id: Option<String>,
    ) -> Option<RunResult> {
        let _ = self.sessions.mark_session_running(thread_ts);
        let _ = self.sessions.increment_message_count(thread_ts);

        let thinking_ts = self.chat.post_message(channel_id, "_thinking…_", Some(thread_ts)).await.ok();

        let builder = ContextBuilder::new(&self.memory);
        let context = builder
            .build(ContextParams {
                thread_ts,
                channel_id: Some(channel_id),
                include_persistent: true,
                include_session: true,
                include_channel_observation: false,
                new_observation: None,
                max_tokens: self.config.max_context_tokens,
            })
            .await;
        let full_prompt = match context.prompt {
            Some(prefix) => format!("{prefix}\n{prompt}"),
            None => prompt.clone(),
        };

        let runner = self.build_runner(role);
        let opts = RunOptions { prompt: full_prompt, session_id, user_id: None, thread_ts: thread_ts.to_string(), channel: channel_id.to_string() };

        let chat = self.chat.clone();
        let channel_owned = channel_id.to_string();
        let on_progress = move |tail: String| {
            let chat = chat.clone();
            let channel = channel_owned.clone();
            let ts = thinking_ts.clone();
            async move {
                if let Some(ts) = ts {
                    let _ = chat.update_message(&channel, &ts, &tail).await;
                }
            }
        };
        let on_compact = |trigger: String, note: String| async move {
            info!(trigger, note, "agent requested compaction mid-turn");
        };
        let warn_chat = self.chat.clone();
        let warn_channel = channel_id.to_string();
        let warn_thread = thread_ts.to_string();
        let on_rate_limit_warning = move |note: String| {
            let chat = warn_chat.clone();
            let channel = warn_channel.clone();
            let thread = warn_thread.clone();
            async move {
                let _ = chat.post_message(&channel, &format!("⚠️ rate limit warning: {note}"), Some(&thread)).await;
            }
        };

        let result = runner.run(opts, on_progress, on_compact, on_rate_limit_warning).await;
        let _ = self.sessions.mark_session_stopped(thread_ts);

        let result = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(thread_ts, error = %e, "agent run errored");
                let _ = self.chat.post_message(channel_id, &format!("⚠️ agent run failed: {e}"), Some(thread_ts)).await;
                return None;
            }
        };

        if let Some(sid) = &result.session_id {
            let _ = self.sessions.update_session_id(thread_ts, sid);
        }

        if result.interrupted {
            info!(thread_ts, "turn interrupted by a newer message");
            return Some(result);
        }

        if !result.success {
            let msg = result.error.clone().unwrap_or_else(|| "turn failed".to_string());
            let _ = self.chat.post_message(channel_id, &format!("⚠️ {msg}"), Some(thread_ts)).await;
            return Some(result);
        }

        let marker = find_marker(&result.output);
        let visible = strip_markers(&result.output);
        let (summary, details) = warden_channels::formatter::parse_summary_details(&visible);
        let mut reply = summary;
        if let Some(usage) = &result.usage {
            reply.push('\n');
            reply.push_str(&warden_channels::formatter::build_context_usage_bar(usage));
        }
        let _ = self.chat.post_message(channel_id, &reply, Some(thread_ts)).await;
        if let Some(details) = details {
            let _ = self.chat.post_message(channel_id, &details, Some(thread_ts)).await;
        }

        if role.is_admin() {
            self.apply_marker(marker, channel_id, thread_ts).await;
        }

        self.observe_turn(thread_ts, msg_ts, &result.collected_messages).await;
        let _ = self.sessions.flush();
        Some(result)
    }

    async fn apply_marker(&self, marker: Option<Marker>, channel_id: &str, thread_ts: &str) {
        match marker {
            Some(Marker::Update) => {
                if let Some(operator) = &self.config.operator_thread_ts {
                    let running = self.sessions.get_running_session_count();
                    let note = if running > 0 {
                        format!("update requested from {thread_ts}; {running} other session(s) still running, waiting for them to drain")
                    } else {
                        format!("update requested from {thread_ts}; no other sessions running, proceeding")
                    };
                    let _ = self.chat.post_message(operator, &note, None).await;
                } else {
                    let _ = self.chat.post_message(channel_id, "update requested, but no operator channel is configured to confirm it", Some(thread_ts)).await;
                }
            }
            Some(Marker::Restart) => {
                let running = self.sessions.get_running_session_count();
                if running == 0 {
                    info!(thread_ts, "restart marker with no other sessions running");
                } else {
                    warn!(thread_ts, running, "restart marker while other sessions are still running; deferring");
                }
            }
            Some(Marker::ListRun(name)) => match self.list_runner.start_by_name(&name, self.tracker.as_ref()).await {
                Ok(session) => info!(thread_ts, list = %name, session_id = %session.session_id, "started list run from marker"),
                Err(e) => warn!(thread_ts, list = %name, error = %e, "failed to start list run from marker"),
            },
            None => {}
        }
    }

    async fn observe_turn(&self, thread_ts: &str, _msg_ts: &str, collected_messages: &[String]) {
        let turns: Vec<ConversationTurn> = collected_messages
            .iter()
            .filter(|m| !m.starts_with('['))
            .map(|m| ConversationTurn { role: "assistant".to_string(), content: m.clone() })
            .collect();
        if turns.is_empty() {
            return;
        }
        let Some(session) = self.sessions.get(thread_ts) else { return };
        if self.observer.observe(thread_ts, &session.user_id, &session.username, &turns).await {
            self.observer.reflect(thread_ts).await;
        }
    }
}

#[async_trait::async_trait]
impl TurnRunner for SessionExecutor {
    /// Same lock → context-prefix → run → post → marker → observe flow as
    /// `process_turn`'s chat path — a tracker-originated turn is a turn like
    /// any other, just one H didn't hear about through chat first.
    async fn run_turn(&self, thread_ts: &str, channel_id: &str, prompt: &str, role: Role, session_id: Option<String>) -> TurnOutcome {
        let session = self.sessions.get_or_create(thread_ts, channel_id, "tracker", "tracker", role, SourceType::Trello);
        let lock = self.sessions.get_session_lock(thread_ts);
        let token = LockToken::new();
        let Some(guard) = lock.try_acquire(token) else {
            return TurnOutcome { success: false, output: "thread busy".to_string(), session_id };
        };

        let session_id = session_id.or(session.session_id.clone());
        let result = self.run_locked(thread_ts, channel_id, prompt.to_string(), thread_ts, role, session_id).await;
        drop(guard);

        match result {
            Some(r) => TurnOutcome { success: r.success && !r.interrupted, output: r.output, session_id: r.session_id },
            None => TurnOutcome { success: false, output: "turn failed".to_string(), session_id: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use warden_agent::RunnerRegistry;
    use warden_channels::ChannelError;
    use warden_core::config::MemoryConfig;
    use warden_tracker::{Card, TrackerError, TrackerList, TrackerStore};

    #[derive(Default)]
    struct RecordingChat {
        reactions: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl ChatAdapter for RecordingChat {
        async fn post_message(&self, _channel: &str, _text: &str, _thread_ts: Option<&str>) -> std::result::Result<String, ChannelError> {
            Ok("1.0".to_string())
        }
        async fn update_message(&self, _channel: &str, _ts: &str, _text: &str) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        async fn add_reaction(&self, _channel: &str, ts: &str, name: &str) -> std::result::Result<(), ChannelError> {
            self.reactions.lock().unwrap().push((ts.to_string(), name.to_string()));
            Ok(())
        }
        async fn remove_reaction(&self, _channel: &str, _ts: &str, _name: &str) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        async fn open_dm(&self, _user: &str) -> std::result::Result<String, ChannelError> {
            Ok("dm".to_string())
        }
    }

    struct NoopLlm;
    #[async_trait::async_trait]
    impl warden_core::LlmAdapter for NoopLlm {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> warden_core::Result<String> {
            Ok(String::new())
        }
    }

    struct EmptyTracker;
    #[async_trait::async_trait]
    impl TrackerAdapter for EmptyTracker {
        async fn get_lists(&self) -> std::result::Result<Vec<TrackerList>, TrackerError> {
            Ok(vec![])
        }
        async fn get_cards_in_list(&self, _list_id: &str) -> std::result::Result<Vec<Card>, TrackerError> {
            Ok(vec![])
        }
        async fn get_card(&self, card_id: &str) -> std::result::Result<Card, TrackerError> {
            Err(TrackerError::CardNotTracked { card_id: card_id.to_string() })
        }
        async fn move_card(&self, _card_id: &str, _list_id: &str) -> std::result::Result<(), TrackerError> {
            Ok(())
        }
        async fn update_card_name(&self, _card_id: &str, _name: &str) -> std::result::Result<(), TrackerError> {
            Ok(())
        }
        async fn remove_label_from_card(&self, _card_id: &str, _label_id: &str) -> std::result::Result<(), TrackerError> {
            Ok(())
        }
    }

    fn make_executor(dir: &std::path::Path, chat: Arc<RecordingChat>) -> SessionExecutor {
        let sessions = Arc::new(SessionManager::new(dir.join("sessions.json")));
        let memory = Arc::new(MemoryStore::new(dir.join("memory")));
        let observer = Arc::new(ObservationPipeline::new(memory.clone(), Arc::new(NoopLlm), MemoryConfig::default()));
        let tracker_store = Arc::new(TrackerStore::new(dir.join("tracker")));
        let list_runner = Arc::new(ListRunner::new(tracker_store));
        let registry = Arc::new(RunnerRegistry::new());
        let config = SessionExecutorConfig {
            agent_binary: "claude".to_string(),
            log_dir: dir.join("logs").to_string_lossy().to_string(),
            mcp_bridge_path: None,
            admin_tools: Vec::new(),
            max_context_tokens: 4000,
            operator_thread_ts: None,
        };
        SessionExecutor::new(sessions, memory, observer, chat, Arc::new(EmptyTracker), list_runner, registry, config)
    }

    #[tokio::test]
    async fn a_busy_thread_stashes_the_newer_prompt_and_reacts() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(RecordingChat::default());
        let executor = make_executor(dir.path(), chat.clone());

        // Hold the thread's lock ourselves to simulate an in-flight turn.
        let lock = executor.sessions.get_session_lock("T1");
        let _guard = lock.try_acquire(LockToken::new()).unwrap();

        executor
            .process_turn("T1", "C1", "second message", "100.2", Role::Viewer, SourceType::Mention, "U1", "alice")
            .await;

        assert!(executor.pending.contains_key("T1"));
        assert_eq!(executor.pending.get("T1").unwrap().prompt, "second message");
        assert!(chat.reactions.lock().unwrap().iter().any(|(ts, name)| ts == "100.2" && name == warden_channels::reactions::PREEMPT_EMOJI));
    }

    #[tokio::test]
    async fn run_turn_creates_an_admin_trello_session_before_checking_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(RecordingChat::default());
        let executor = make_executor(dir.path(), chat.clone());

        let lock = executor.sessions.get_session_lock("CARD1");
        let _guard = lock.try_acquire(LockToken::new()).unwrap();

        let outcome = executor.run_turn("CARD1", "C1", "new tracker card", Role::Admin, None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.output, "thread busy");
        let session = executor.sessions.get("CARD1").expect("a session should exist for the card's thread");
        assert_eq!(session.source_type, SourceType::Trello);
        assert_eq!(session.role, Role::Admin);
        assert_eq!(session.channel_id, "C1");
    }
}
