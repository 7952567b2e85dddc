//! Component E — ObservationPipeline (Observer/Reflector/Promoter/Compactor).
//!
//! Grounded on `skynet-agent::pipeline::compact::compact_session_if_needed`'s
//! shape: call an LLM, pull a JSON array out of a possibly markdown-wrapped
//! response, persist it, then prune. Generalized here into four independent,
//! individually-swallowed stages over the filesystem `MemoryStore` instead of
//! a SQLite conversation table.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;
use warden_core::config::MemoryConfig;
use warden_core::tokens::count_tokens_many;
use warden_core::LlmAdapter;

use crate::store::MemoryStore;
use crate::types::{Candidate, MemoryRecord, Observation, ObservationSource, PersistentItem, PersistentMeta, Priority};

/// One turn of plain text — already stripped of tool_use/tool_result rows.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

/// Drop tool_use/tool_result rows, keeping user + pure assistant text only
///. `collected_messages` entries produced by the
/// AgentRunner prefix tool rows with these literal markers.
pub fn filter_pure_text(messages: &[ConversationTurn]) -> Vec<ConversationTurn> {
    messages
        .iter()
        .filter(|m| !m.content.starts_with("[tool_use:") && !m.content.starts_with("[tool_result"))
        .cloned()
        .collect()
}

fn extract_json_array(raw: &str) -> &str {
    let raw = raw.trim();
    match (raw.find('['), raw.rfind(']')) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw,
    }
}

#[derive(Debug, Deserialize)]
struct ObserverItem {
    priority: String,
    content: String,
    #[serde(default)]
    candidate: bool,
}

fn parse_priority(s: &str) -> Priority {
    match s {
        "🔴" | "red" | "high" => Priority::Red,
        "🟡" | "yellow" | "medium" => Priority::Yellow,
        _ => Priority::Green,
    }
}

pub struct ObservationPipeline {
    store: Arc<MemoryStore>,
    llm: Arc<dyn LlmAdapter>,
    config: MemoryConfig,
}

impl ObservationPipeline {
    pub fn new(store: Arc<MemoryStore>, llm: Arc<dyn LlmAdapter>, config: MemoryConfig) -> Self {
        Self { store, llm, config }
    }

    /// 4.E.1 Observer. Returns `false` only on genuine failure (LLM call or
    /// store write failed) so H can log it — never panics, never aborts the
    /// caller's turn.
    pub async fn observe(&self, thread_ts: &str, user_id: &str, username: &str, messages: &[ConversationTurn]) -> bool {
        let pure = filter_pure_text(messages);
        let transcript: String = pure.iter().map(|m| format!("{}: {}", m.role.to_uppercase(), m.content)).collect::<Vec<_>>().join("\n\n");

        let turn_tokens = count_tokens_many(pure.iter().map(|m| m.content.as_str()));
        if turn_tokens < self.config.min_turn_tokens {
            return true;
        }

        let system = concat!(
            "You observe a single conversation turn and extract durable observations ",
            "about the user and task. Return ONLY a JSON array, each element ",
            r#"{"priority":"🔴|🟡|🟢","content":"...","candidate":true|false}. "#,
            "Mark an item `candidate: true` when it looks durable enough to promote ",
            "to long-term memory. Return [] if nothing is worth keeping."
        );

        let response = match self.llm.complete(system, &transcript).await {
            Ok(r) => r,
            Err(e) => {
                warn!(thread_ts, error = %e, "observer: LLM call failed, treating as no-op");
                return false;
            }
        };

        let json_str = extract_json_array(&response);
        let items: Vec<ObserverItem> = match serde_json::from_str(json_str) {
            Ok(v) => v,
            Err(e) => {
                warn!(thread_ts, error = %e, raw = %json_str, "observer: JSON parse failed");
                return false;
            }
        };

        let mut record = match self.store.get_record(thread_ts).await {
            Ok(Some(mut r)) => {
                // A record migrated from legacy markdown has no identity fields
                // (the old layout kept those in a separate meta file); backfill
                // from the caller, who already knows who this thread belongs to.
                if r.user_id.is_empty() {
                    r.user_id = user_id.to_string();
                }
                if r.username.is_empty() {
                    r.username = username.to_string();
                }
                r
            }
            Ok(None) => MemoryRecord::new(thread_ts, user_id, username),
            Err(e) => {
                warn!(thread_ts, error = %e, "observer: failed to load record");
                return false;
            }
        };

        let now = Utc::now().to_rfc3339();
        let mut new_candidates = Vec::new();
        for item in items {
            let priority = parse_priority(&item.priority);
            if item.candidate {
                new_candidates.push(Candidate { ts: now.clone(), priority, content: item.content });
            } else {
                record.observations.push(Observation {
                    id: Uuid::new_v4().to_string(),
                    priority,
                    content: item.content,
                    session_date: now.clone(),
                    created_at: now.clone(),
                    source: ObservationSource::Observer,
                });
            }
        }
        record.total_sessions_observed += 1;

        if let Err(e) = self.store.save_record(&record).await {
            warn!(thread_ts, error = %e, "observer: failed to save record");
            return false;
        }
        if !new_candidates.is_empty() {
            if let Err(e) = self.store.append_candidates(thread_ts, new_candidates).await {
                warn!(thread_ts, error = %e, "observer: failed to append candidates");
                return false;
            }
        }
        true
    }

    /// 4.E.2 Reflector — compress a thread's observations once they exceed
    /// `reflection_threshold`, preserving priority order.
    pub async fn reflect(&self, thread_ts: &str) {
        let Ok(Some(mut record)) = self.store.get_record(thread_ts).await else { return };
        let tokens = count_tokens_many(record.observations.iter().map(|o| o.content.as_str()));
        if tokens <= self.config.reflection_threshold {
            return;
        }

        let transcript: String = record
            .observations
            .iter()
            .map(|o| format!("{} {}", o.priority, o.content))
            .collect::<Vec<_>>()
            .join("\n");
        let system = concat!(
            "Compress the following observations into a shorter list that preserves ",
            "their relative priority order. Return ONLY a JSON array of ",
            r#"{"priority":"🔴|🟡|🟢","content":"..."}."#
        );

        let response = match self.llm.complete(system, &transcript).await {
            Ok(r) => r,
            Err(e) => {
                warn!(thread_ts, error = %e, "reflector: LLM call failed, leaving observations as-is");
                return;
            }
        };
        let json_str = extract_json_array(&response);
        let items: Vec<ObserverItem> = match serde_json::from_str(json_str) {
            Ok(v) => v,
            Err(e) => {
                warn!(thread_ts, error = %e, "reflector: JSON parse failed");
                return;
            }
        };

        let now = Utc::now().to_rfc3339();
        record.observations = items
            .into_iter()
            .map(|item| Observation {
                id: Uuid::new_v4().to_string(),
                priority: parse_priority(&item.priority),
                content: item.content,
                session_date: now.clone(),
                created_at: now.clone(),
                source: ObservationSource::Observer,
            })
            .collect();
        record.reflection_count += 1;

        if let Err(e) = self.store.save_record(&record).await {
            warn!(thread_ts, error = %e, "reflector: failed to save compressed record");
        }
    }

    /// 4.E.3 Promoter — if total candidates exceed `promotion_threshold`,
    /// pick which become persistent. *All* candidates are cleared afterward
    /// regardless of the verdict — an at-least-one-opportunity policy.
    pub async fn promote(&self) {
        let Ok(by_thread) = self.store.load_all_candidates().await else { return };
        let total: usize = by_thread.values().map(Vec::len).sum();
        if total == 0 || total <= self.config.promotion_threshold as usize {
            return;
        }

        let mut flat: Vec<(&String, &Candidate)> = Vec::new();
        for (thread_ts, candidates) in &by_thread {
            for c in candidates {
                flat.push((thread_ts, c));
            }
        }
        let transcript: String = flat
            .iter()
            .enumerate()
            .map(|(i, (_, c))| format!("[{i}] {} {}", c.priority, c.content))
            .collect::<Vec<_>>()
            .join("\n");
        let system = concat!(
            "Each line is a candidate memory item tagged with an index. Decide which ",
            "are durable enough for long-term persistent memory. Return ONLY JSON: ",
            r#"{"promoted":[indices...],"rejected":[indices...]}."#
        );

        #[derive(Deserialize)]
        struct Verdict {
            promoted: Vec<usize>,
            #[allow(dead_code)]
            rejected: Vec<usize>,
        }

        let verdict: Option<Verdict> = match self.llm.complete(system, &transcript).await {
            Ok(r) => serde_json::from_str(extract_json_array_or_object(&r)).ok(),
            Err(e) => {
                warn!(error = %e, "promoter: LLM call failed");
                None
            }
        };

        if let Some(verdict) = verdict {
            let promoted: Vec<PersistentItem> = verdict
                .promoted
                .into_iter()
                .filter_map(|i| flat.get(i))
                .map(|(_, c)| PersistentItem {
                    id: Uuid::new_v4().to_string(),
                    priority: c.priority,
                    content: c.content.clone(),
                    promoted_at: Utc::now().to_rfc3339(),
                })
                .collect();

            if !promoted.is_empty() {
                if let Ok(mut persistent) = self.store.get_persistent().await {
                    persistent.content.extend(promoted);
                    let token_count = count_tokens_many(persistent.content.iter().map(|i| i.content.as_str()));
                    let _ = self
                        .store
                        .save_persistent(persistent.content, PersistentMeta { token_count })
                        .await;
                }
            }
        }

        for thread_ts in by_thread.keys() {
            let _ = self.store.clear_candidates(thread_ts).await;
        }
        info!(candidates = total, "promoter: cleared all candidates after promotion pass");
    }

    /// 4.E.4 Compactor — shrink persistent memory when it exceeds
    /// `compaction_threshold`, converging on `compaction_target`.
    pub async fn compact_persistent(&self) {
        let Ok(persistent) = self.store.get_persistent().await else { return };
        if persistent.meta.token_count <= self.config.compaction_threshold {
            return;
        }

        let transcript: String =
            persistent.content.iter().map(|i| format!("{} {}", i.priority, i.content)).collect::<Vec<_>>().join("\n");
        let system = format!(
            "Compress the persistent memory below to roughly {} tokens while preserving \
             priority order and the most important items. Return ONLY a JSON array of \
             {{\"priority\":\"🔴|🟡|🟢\",\"content\":\"...\"}}.",
            self.config.compaction_target
        );

        let response = match self.llm.complete(&system, &transcript).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "compactor: LLM call failed, leaving persistent memory as-is");
                return;
            }
        };
        let json_str = extract_json_array(&response);
        let items: Vec<ObserverItem> = match serde_json::from_str(json_str) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "compactor: JSON parse failed");
                return;
            }
        };

        let now = Utc::now().to_rfc3339();
        let compacted: Vec<PersistentItem> = items
            .into_iter()
            .map(|item| PersistentItem {
                id: Uuid::new_v4().to_string(),
                priority: parse_priority(&item.priority),
                content: item.content,
                promoted_at: now.clone(),
            })
            .collect();
        let token_count = count_tokens_many(compacted.iter().map(|i| i.content.as_str()));

        if let Err(e) = self.store.save_persistent(compacted, PersistentMeta { token_count }).await {
            warn!(error = %e, "compactor: failed to save compacted persistent memory");
        }
    }
}

fn extract_json_array_or_object(raw: &str) -> &str {
    let raw = raw.trim();
    if let (Some(s), Some(e)) = (raw.find('{'), raw.rfind('}')) {
        if e >= s {
            return &raw[s..=e];
        }
    }
    extract_json_array(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubLlm(String);

    #[async_trait::async_trait]
    impl LlmAdapter for StubLlm {
        async fn complete(&self, _system: &str, _user: &str) -> warden_core::Result<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn observer_below_threshold_is_noop_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(dir.path()));
        let llm = Arc::new(StubLlm("[]".into()));
        let mut config = MemoryConfig::default();
        config.min_turn_tokens = 10_000;
        let pipeline = ObservationPipeline::new(store, llm, config);
        let ok = pipeline
            .observe("T1", "U1", "alice", &[ConversationTurn { role: "user".into(), content: "hi".into() }])
            .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn observer_parses_items_and_splits_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(dir.path()));
        let response = r#"```json
        [{"priority":"🔴","content":"likes rust","candidate":false},
         {"priority":"🟢","content":"wants dark mode","candidate":true}]
        ```"#;
        let llm = Arc::new(StubLlm(response.into()));
        let pipeline = ObservationPipeline::new(store.clone(), llm, MemoryConfig::default());
        let ok = pipeline
            .observe("T1", "U1", "alice", &[ConversationTurn { role: "user".into(), content: "I like rust and want dark mode".into() }])
            .await;
        assert!(ok);

        let record = store.get_record("T1").await.unwrap().unwrap();
        assert_eq!(record.observations.len(), 1);
        let candidates = store.load_all_candidates().await.unwrap();
        assert_eq!(candidates.get("T1").unwrap().len(), 1);
    }

    #[test]
    fn filter_pure_text_drops_tool_rows() {
        let messages = vec![
            ConversationTurn { role: "user".into(), content: "do the thing".into() },
            ConversationTurn { role: "assistant".into(), content: "[tool_use: bash] {\"cmd\":\"ls\"}".into() },
            ConversationTurn { role: "assistant".into(), content: "done".into() },
        ];
        let filtered = filter_pure_text(&messages);
        assert_eq!(filtered.len(), 2);
    }
}
