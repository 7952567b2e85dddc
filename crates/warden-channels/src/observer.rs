//! Component G — the ChannelObserver pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use warden_core::config::ChannelConfig;
use warden_core::llm::LlmAdapter;
use warden_core::tokens::count_tokens;
use warden_core::{Role, SourceType};
use warden_memory::store::MemoryStore;
use warden_memory::types::{ChannelMessage, InterventionKind};
use warden_sessions::SessionManager;

use crate::adapter::ChatAdapter;
use crate::error::Result;
use crate::probability::{record_intervention, should_intervene};
use crate::types::{JudgeResponse, ReactionType};

pub struct ChannelObserver {
    store: Arc<MemoryStore>,
    chat: Arc<dyn ChatAdapter>,
    llm: Arc<dyn LlmAdapter>,
    config: ChannelConfig,
    bot_user_id: String,
    sessions: Option<Arc<SessionManager>>,
}

impl ChannelObserver {
    pub fn new(
        store: Arc<MemoryStore>,
        chat: Arc<dyn ChatAdapter>,
        llm: Arc<dyn LlmAdapter>,
        config: ChannelConfig,
        bot_user_id: String,
    ) -> Self {
        Self { store, chat, llm, config, bot_user_id, sessions: None }
    }

    /// Anchor a hybrid session at the bot's own intervene response so a
    /// follow-up mention in the same thread picks H up directly instead of
    /// going back through the judge.
    pub fn with_session_manager(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Run one pass of the pipeline for `channel_id`. `mention_tracked_ts` is
    /// the set of `thread_ts`/`ts` values H is already handling directly, so
    /// the judge never double-reacts to a direct mention.
    pub async fn run(&self, channel_id: &str, mention_tracked_ts: &HashSet<String>) -> Result<()> {
        // 1. Gate on pending token volume.
        let pending_tokens = self.store.count_pending_tokens(channel_id).await?;
        if pending_tokens < self.config.threshold_a {
            return Ok(());
        }

        // 2. Roll judged+pending into the digest if it has grown too large.
        let judged_plus_pending = self.store.count_judged_plus_pending_tokens(channel_id).await?;
        if judged_plus_pending > self.config.threshold_b {
            self.refresh_digest(channel_id).await?;
        }

        // 3. Snapshot pending/thread_buffers and call the judge.
        let pending = self.store.load_pending(channel_id).await?;
        let thread_buffers = self.store.load_all_thread_buffers(channel_id).await?;
        let judged = self.store.load_judged(channel_id).await?;
        let digest = self.store.get_digest(channel_id).await?;

        let all_thread_messages: Vec<&ChannelMessage> = thread_buffers.values().flatten().collect();

        let visible_pending: Vec<&ChannelMessage> = pending
            .iter()
            .filter(|m| !mention_tracked_ts.contains(&m.ts) && !mention_tracked_ts.contains(m.thread_ts.as_deref().unwrap_or("")))
            .collect();
        let visible_threads: Vec<&ChannelMessage> = all_thread_messages
            .iter()
            .filter(|m| !mention_tracked_ts.contains(&m.ts) && !mention_tracked_ts.contains(m.thread_ts.as_deref().unwrap_or("")))
            .copied()
            .collect();

        if visible_pending.is_empty() && visible_threads.is_empty() {
            return Ok(());
        }

        let prompt = build_judge_prompt(&digest.content, &judged, &visible_pending, &visible_threads, &self.bot_user_id);
        let raw = match self.llm.complete(JUDGE_SYSTEM_PROMPT, &prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(channel_id, error = %e, "judge LLM call failed; skipping this pass");
                return Ok(());
            }
        };
        let mut response: JudgeResponse = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(channel_id, error = %e, "unparseable judge response; skipping this pass");
                return Ok(());
            }
        };

        // 4. Importance modifiers.
        for item in response.items.iter_mut() {
            if item.related_to_me {
                item.importance = ((item.importance as u32 * 2).min(10)) as u8;
            }
            if item.addressed_to_me && !item.sender_is_bot {
                item.importance = item.importance.max(7);
                item.reaction_type = ReactionType::Intervene;
            }
        }

        // 5/6. Validate linked_message_ts and ts against known buffers.
        let known: HashSet<&str> = judged
            .iter()
            .map(|m| m.ts.as_str())
            .chain(pending.iter().map(|m| m.ts.as_str()))
            .chain(all_thread_messages.iter().map(|m| m.ts.as_str()))
            .collect();
        let pending_ts: HashSet<&str> = pending.iter().map(|m| m.ts.as_str()).collect();

        response.items.retain(|item| {
            if !pending_ts.contains(item.ts.as_str()) {
                return false;
            }
            true
        });
        for item in response.items.iter_mut() {
            if let Some(linked) = &item.linked_message_ts {
                if linked == &item.ts || !known.contains(linked.as_str()) {
                    item.linked_message_ts = None;
                }
            }
        }

        // 7. Execute reactions.
        let trigger_lookup: HashMap<&str, &ChannelMessage> = pending
            .iter()
            .map(|m| (m.ts.as_str(), m))
            .chain(all_thread_messages.iter().map(|m| (m.ts.as_str(), *m)))
            .chain(judged.iter().map(|m| (m.ts.as_str(), m)))
            .collect();
        self.execute_reactions(channel_id, &response.items, &digest.content, &trigger_lookup).await;

        // 8. Move the snapshot to judged regardless of reaction outcome.
        let pending_ts_set: HashSet<String> = pending.iter().map(|m| m.ts.clone()).collect();
        let thread_root_set: HashSet<String> = thread_buffers.keys().cloned().collect();
        self.store.move_snapshot_to_judged(channel_id, &pending_ts_set, &thread_root_set).await?;

        Ok(())
    }

    async fn refresh_digest(&self, channel_id: &str) -> Result<()> {
        let digest = self.store.get_digest(channel_id).await?;
        let judged = self.store.load_judged(channel_id).await?;
        let pending = self.store.load_pending(channel_id).await?;
        if judged.is_empty() && pending.is_empty() {
            return Ok(());
        }
        let body: String = judged
            .iter()
            .chain(pending.iter())
            .map(|m| format!("{}: {}", m.username, m.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("Prior digest:\n{}\n\nNew messages:\n{}\n\nProduce an updated digest.", digest.content, body);
        let mut new_content = match self.llm.complete(DIGEST_SYSTEM_PROMPT, &prompt).await {
            Ok(c) => c,
            Err(e) => {
                warn!(channel_id, error = %e, "digest LLM call failed; keeping prior digest");
                return Ok(());
            }
        };

        if count_tokens(&new_content) > self.config.digest_max_tokens {
            let compress_prompt = format!("Compress to about {} tokens, preserving the most important points:\n{}", self.config.digest_target_tokens, new_content);
            match self.llm.complete(DIGEST_SYSTEM_PROMPT, &compress_prompt).await {
                Ok(compressed) => new_content = compressed,
                Err(e) => warn!(channel_id, error = %e, "digest compressor failed; keeping uncompressed digest"),
            }
        }

        let mut digest = digest;
        digest.content = new_content;
        digest.meta.token_count = count_tokens(&digest.content);
        digest.last_digested_at = Some(Utc::now().to_rfc3339());
        self.store.save_digest(channel_id, &digest).await?;
        self.store.clear_judged(channel_id).await?;
        Ok(())
    }

    async fn execute_reactions(
        &self,
        channel_id: &str,
        items: &[crate::types::JudgeItem],
        digest_content: &str,
        trigger_lookup: &HashMap<&str, &ChannelMessage>,
    ) {
        // React actions first, batched; skip targets that already carry the
        // same emoji from us.
        for item in items.iter().filter(|i| i.reaction_type == ReactionType::React) {
            let Some(name) = &item.emoji_name else { continue };
            if let Err(e) = self.chat.add_reaction(channel_id, &item.ts, name).await {
                warn!(channel_id, ts = %item.ts, error = %e, "failed to add reaction");
            }
        }

        // At most one intervene action fires per pass: the highest-importance
        // candidate that survives the burst/cooldown model.
        let mut intervene_candidates: Vec<&crate::types::JudgeItem> =
            items.iter().filter(|i| i.reaction_type == ReactionType::Intervene).collect();
        intervene_candidates.sort_by(|a, b| b.importance.cmp(&a.importance));

        let mut history = match self.store.get_intervention_history(channel_id).await {
            Ok(h) => h,
            Err(_) => Default::default(),
        };

        for item in intervene_candidates {
            let now = Utc::now();
            if !should_intervene(&history, item.importance, now, self.config.intervention_threshold) {
                continue;
            }
            debug!(channel_id, ts = %item.ts, importance = item.importance, "firing intervention");

            let trigger = trigger_lookup.get(item.ts.as_str()).copied();
            let Some(response_text) = self.generate_intervene_response(digest_content, trigger).await else {
                continue;
            };

            let resp_ts = match self.chat.post_message(channel_id, &response_text, Some(&item.ts)).await {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(channel_id, error = %e, "intervention post failed");
                    continue;
                }
            };

            if let Some(sessions) = &self.sessions {
                sessions.get_or_create(&resp_ts, channel_id, &self.bot_user_id, &self.bot_user_id, Role::Viewer, SourceType::Hybrid);
            }

            record_intervention(&mut history, now, InterventionKind::Message);
            let _ = self.store.save_intervention_history(channel_id, &history).await;
            break;
        }
    }

    /// Builds a reply to the trigger message via a dedicated LLM call,
    /// separate from the judge call that decided to intervene in the first
    /// place. Returns `None` (skipping the intervention) on an LLM failure
    /// or an empty response, mirroring the judge-call failure handling.
    async fn generate_intervene_response(&self, digest_content: &str, trigger: Option<&ChannelMessage>) -> Option<String> {
        let trigger_text = trigger.map(|m| format!("{}: {}", m.username, m.text)).unwrap_or_default();
        let user_prompt = format!(
            "digest:\n{digest_content}\n\ntrigger message:\n{trigger_text}\n\nWrite a short, natural reply to the trigger message."
        );
        match self.llm.complete(INTERVENE_SYSTEM_PROMPT, &user_prompt).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                warn!("intervene: LLM returned an empty response");
                None
            }
            Err(e) => {
                warn!(error = %e, "intervene: LLM call failed");
                None
            }
        }
    }
}

const JUDGE_SYSTEM_PROMPT: &str = "You triage channel chatter for a bot. Return JSON {\"items\":[{ts,reaction_type,importance,emoji_name?,linked_message_ts?,related_to_me?,addressed_to_me?,sender_is_bot?}]}.";
const DIGEST_SYSTEM_PROMPT: &str = "You maintain a running digest of channel activity. Return the updated digest text only.";
const INTERVENE_SYSTEM_PROMPT: &str =
    "You are a helpful presence in a busy channel. Given a digest of prior activity and a single \
     trigger message, write a short, natural reply. Return the reply text only, no quoting or preamble.";

fn build_judge_prompt(
    digest: &str,
    judged: &[ChannelMessage],
    pending: &[&ChannelMessage],
    threads: &[&ChannelMessage],
    bot_user_id: &str,
) -> String {
    let fmt = |m: &&ChannelMessage| format!("[{}] {}: {}", m.ts, m.username, m.text);
    format!(
        "bot_user_id: {bot_user_id}\n\ndigest:\n{digest}\n\njudged:\n{}\n\npending:\n{}\n\nthread_buffers:\n{}\n",
        judged.iter().map(|m| format!("[{}] {}: {}", m.ts, m.username, m.text)).collect::<Vec<_>>().join("\n"),
        pending.iter().map(fmt).collect::<Vec<_>>().join("\n"),
        threads.iter().map(fmt).collect::<Vec<_>>().join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use warden_core::config::ChannelConfig;
    use warden_memory::store::MemoryStore;
    use warden_memory::types::InterventionHistory;

    use super::*;
    use crate::error::ChannelError;
    use crate::types::{JudgeItem, ReactionType};

    struct RecordingChat {
        posts: StdMutex<Vec<(String, String, Option<String>)>>,
        post_ts: String,
    }

    impl RecordingChat {
        fn new(post_ts: &str) -> Self {
            Self { posts: StdMutex::new(Vec::new()), post_ts: post_ts.to_string() }
        }
    }

    #[async_trait::async_trait]
    impl ChatAdapter for RecordingChat {
        async fn post_message(&self, channel: &str, text: &str, thread_ts: Option<&str>) -> std::result::Result<String, ChannelError> {
            self.posts.lock().unwrap().push((channel.to_string(), text.to_string(), thread_ts.map(String::from)));
            Ok(self.post_ts.clone())
        }
        async fn update_message(&self, _channel: &str, _ts: &str, _text: &str) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        async fn add_reaction(&self, _channel: &str, _ts: &str, _name: &str) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        async fn remove_reaction(&self, _channel: &str, _ts: &str, _name: &str) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        async fn open_dm(&self, _user: &str) -> std::result::Result<String, ChannelError> {
            Ok("dm".to_string())
        }
    }

    /// Echoes the user prompt back so tests can assert the judge/digest/
    /// intervene call sites got the prompt they expected, or fails every
    /// call when `fail` is set.
    struct ScriptedLlm {
        reply: String,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl LlmAdapter for ScriptedLlm {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> warden_core::Result<String> {
            if self.fail {
                return Err(warden_core::error::WardenError::Network("llm down".to_string()));
            }
            Ok(self.reply.clone())
        }
    }

    fn intervene_item(ts: &str) -> JudgeItem {
        JudgeItem {
            ts: ts.to_string(),
            reaction_type: ReactionType::Intervene,
            importance: 9,
            emoji_name: None,
            linked_message_ts: None,
            related_to_me: false,
            addressed_to_me: true,
            sender_is_bot: false,
        }
    }

    fn observer(dir: &std::path::Path, chat: Arc<dyn ChatAdapter>, llm: Arc<dyn LlmAdapter>) -> ChannelObserver {
        let store = Arc::new(MemoryStore::new(dir.join("memory")));
        ChannelObserver::new(store, chat, llm, ChannelConfig::default(), "BOT".to_string())
    }

    #[tokio::test]
    async fn intervene_posts_generated_response_text_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(RecordingChat::new("200.1"));
        let llm = Arc::new(ScriptedLlm { reply: "welcome aboard!".to_string(), fail: false });
        let obs = observer(dir.path(), chat.clone(), llm);

        let items = vec![intervene_item("100.1")];
        let lookup: HashMap<&str, &ChannelMessage> = HashMap::new();
        obs.execute_reactions("C1", &items, "some digest", &lookup).await;

        let posts = chat.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1, "welcome aboard!");
        assert!(!posts[0].1.is_empty());
    }

    #[tokio::test]
    async fn intervene_skipped_when_llm_call_fails() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(RecordingChat::new("200.1"));
        let llm = Arc::new(ScriptedLlm { reply: String::new(), fail: true });
        let obs = observer(dir.path(), chat.clone(), llm);

        let items = vec![intervene_item("100.1")];
        let lookup: HashMap<&str, &ChannelMessage> = HashMap::new();
        obs.execute_reactions("C1", &items, "some digest", &lookup).await;

        assert!(chat.posts.lock().unwrap().is_empty());
        // No intervention was recorded either, since nothing was posted.
        let history: InterventionHistory = obs.store.get_intervention_history("C1").await.unwrap();
        assert!(history.events.is_empty());
    }

    #[tokio::test]
    async fn intervene_skipped_when_llm_returns_blank_text() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(RecordingChat::new("200.1"));
        let llm = Arc::new(ScriptedLlm { reply: "   ".to_string(), fail: false });
        let obs = observer(dir.path(), chat.clone(), llm);

        let items = vec![intervene_item("100.1")];
        let lookup: HashMap<&str, &ChannelMessage> = HashMap::new();
        obs.execute_reactions("C1", &items, "some digest", &lookup).await;

        assert!(chat.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn intervene_creates_hybrid_session_anchored_at_response_ts_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(RecordingChat::new("200.1"));
        let llm = Arc::new(ScriptedLlm { reply: "here to help".to_string(), fail: false });
        let sessions = Arc::new(SessionManager::new(dir.path().join("sessions.json")));
        let obs = observer(dir.path(), chat.clone(), llm).with_session_manager(sessions.clone());

        let items = vec![intervene_item("100.1")];
        let lookup: HashMap<&str, &ChannelMessage> = HashMap::new();
        obs.execute_reactions("C1", &items, "some digest", &lookup).await;

        let session = sessions.get("200.1").expect("session should be created at the response ts");
        assert_eq!(session.source_type, SourceType::Hybrid);
        assert_eq!(session.channel_id, "C1");
    }

    #[tokio::test]
    async fn intervene_without_session_manager_does_not_panic_or_create_anything() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(RecordingChat::new("200.1"));
        let llm = Arc::new(ScriptedLlm { reply: "here to help".to_string(), fail: false });
        let obs = observer(dir.path(), chat.clone(), llm);

        let items = vec![intervene_item("100.1")];
        let lookup: HashMap<&str, &ChannelMessage> = HashMap::new();
        obs.execute_reactions("C1", &items, "some digest", &lookup).await;

        assert_eq!(chat.posts.lock().unwrap().len(), 1);
    }

    #[test]
    fn trigger_text_is_included_in_the_intervene_prompt() {
        let msg = ChannelMessage {
            ts: "100.1".to_string(),
            thread_ts: None,
            user_id: "U1".to_string(),
            username: "alice".to_string(),
            text: "anyone know why the build is red?".to_string(),
            is_bot: false,
        };
        let lookup: HashMap<&str, &ChannelMessage> = [("100.1", &msg)].into_iter().collect();
        assert_eq!(lookup.get("100.1").unwrap().text, "anyone know why the build is red?");
    }
}
