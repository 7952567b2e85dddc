//! Component F — ContextBuilder.
//!
//! Assembles the memory-injection prefix for a turn out of MemoryStore (B)
//! sections, in priority order, never exceeding `max_tokens` by dropping
//! whole lower-priority sections before truncating earlier ones.

use warden_core::tokens::{count_tokens, truncate_to_tokens};

use crate::store::MemoryStore;

pub struct ContextParams<'a> {
    pub thread_ts: &'a str,
    pub channel_id: Option<&'a str>,
    pub include_persistent: bool,
    pub include_session: bool,
    pub include_channel_observation: bool,
    pub new_observation: Option<&'a str>,
    pub max_tokens: u32,
}

#[derive(Debug, Default, Clone)]
pub struct ContextResult {
    pub prompt: Option<String>,
    pub persistent_tokens: u32,
    pub session_tokens: u32,
    pub new_observation_tokens: u32,
    pub channel_digest_tokens: u32,
    pub channel_buffer_tokens: u32,
}

pub struct ContextBuilder<'s> {
    store: &'s MemoryStore,
}

impl<'s> ContextBuilder<'s> {
    pub fn new(store: &'s MemoryStore) -> Self {
        Self { store }
    }

    pub async fn build(&self, params: ContextParams<'_>) -> ContextResult {
        // Sections in descending priority: long-term memory, observational
        // memory (this thread), new observation (one-shot), channel
        // observation. Each is wrapped in its own tag and may be dropped
        // whole if the running total would exceed max_tokens.
        let mut sections: Vec<(&'static str, String, u32)> = Vec::new();

        if params.include_persistent {
            if let Ok(persistent) = self.store.get_persistent().await {
                if !persistent.content.is_empty() {
                    let body = persistent.content.iter().map(|i| format!("{} {}", i.priority, i.content)).collect::<Vec<_>>().join("\n");
                    let tokens = count_tokens(&body);
                    sections.push(("long-term-memory", body, tokens));
                }
            }
        }

        if params.include_session {
            if let Ok(Some(record)) = self.store.get_record(params.thread_ts).await {
                if !record.observations.is_empty() {
                    let body = record.observations.iter().map(|o| format!("{} {}", o.priority, o.content)).collect::<Vec<_>>().join("\n");
                    let tokens = count_tokens(&body);
                    sections.push(("observational-memory", body, tokens));
                }
            }
        }

        if let Some(new_observation) = params.new_observation {
            if !new_observation.is_empty() {
                let tokens = count_tokens(new_observation);
                sections.push(("new-observation", new_observation.to_string(), tokens));
            }
        }

        if params.include_channel_observation {
            if let Some(channel_id) = params.channel_id {
                if let Ok(digest) = self.store.get_digest(channel_id).await {
                    if let Ok(pending) = self.store.load_pending(channel_id).await {
                        let recent: String = pending.iter().rev().take(20).rev().map(|m| format!("{}: {}", m.username, m.text)).collect::<Vec<_>>().join("\n");
                        let mut body = String::new();
                        if !digest.content.is_empty() {
                            body.push_str(&digest.content);
                        }
                        if !recent.is_empty() {
                            if !body.is_empty() {
                                body.push('\n');
                            }
                            body.push_str(&recent);
                        }
                        if !body.is_empty() {
                            let tokens = count_tokens(&body);
                            sections.push(("channel-observation", body, tokens));
                        }
                    }
                }
            }
        }

        // Drop whole sections from the back until the total fits.
        let mut total: u32 = sections.iter().map(|(_, _, t)| *t).sum();
        while total > params.max_tokens && sections.len() > 1 {
            if let Some((_, _, t)) = sections.pop() {
                total -= t;
            }
        }

        // Even the sole remaining (highest-priority) section can still
        // exceed the budget on its own; truncate its body rather than drop
        // it entirely, since a context prefix is never silently empty when
        // there was something to say.
        if let Some((_, body, tokens)) = sections.last_mut() {
            if *tokens > params.max_tokens {
                *body = truncate_to_tokens(body, params.max_tokens);
                *tokens = count_tokens(body);
            }
        }

        let mut result = ContextResult::default();
        let mut prompt = String::new();
        for (tag, body, tokens) in &sections {
            prompt.push_str(&format!("<{tag}>\n{body}\n</{tag}>\n"));
            match *tag {
                "long-term-memory" => result.persistent_tokens = *tokens,
                "observational-memory" => result.session_tokens = *tokens,
                "new-observation" => result.new_observation_tokens = *tokens,
                "channel-observation" => {
                    // Digest and buffer share the section's accounting; split
                    // is not observable post-merge, so attribute the whole
                    // amount to the digest bucket and leave buffer at 0.
                    result.channel_digest_tokens = *tokens;
                }
                _ => {}
            }
        }

        result.prompt = if prompt.is_empty() { None } else { Some(prompt) };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryRecord, Observation, ObservationSource, Priority};

    #[tokio::test]
    async fn empty_store_yields_no_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        let builder = ContextBuilder::new(&store);
        let result = builder
            .build(ContextParams {
                thread_ts: "T1",
                channel_id: None,
                include_persistent: true,
                include_session: true,
                include_channel_observation: false,
                new_observation: None,
                max_tokens: 1000,
            })
            .await;
        assert!(result.prompt.is_none());
    }

    #[tokio::test]
    async fn includes_session_observations_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        let mut record = MemoryRecord::new("T1", "U1", "alice");
        record.observations.push(Observation {
            id: "1".into(),
            priority: Priority::Green,
            content: "likes rust".into(),
            session_date: "now".into(),
            created_at: "now".into(),
            source: ObservationSource::Observer,
        });
        store.save_record(&record).await.unwrap();

        let builder = ContextBuilder::new(&store);
        let result = builder
            .build(ContextParams {
                thread_ts: "T1",
                channel_id: None,
                include_persistent: false,
                include_session: true,
                include_channel_observation: false,
                new_observation: None,
                max_tokens: 1000,
            })
            .await;
        assert!(result.prompt.unwrap().contains("likes rust"));
        assert!(result.session_tokens > 0);
    }

    #[tokio::test]
    async fn sole_remaining_section_is_truncated_not_dropped_when_over_budget() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        let mut record = MemoryRecord::new("T1", "U1", "alice");
        record.observations.push(Observation {
            id: "1".into(),
            priority: Priority::Green,
            content: "word ".repeat(500),
            session_date: "now".into(),
            created_at: "now".into(),
            source: ObservationSource::Observer,
        });
        store.save_record(&record).await.unwrap();

        let builder = ContextBuilder::new(&store);
        let result = builder
            .build(ContextParams {
                thread_ts: "T1",
                channel_id: None,
                include_persistent: false,
                include_session: true,
                include_channel_observation: false,
                new_observation: None,
                max_tokens: 10,
            })
            .await;

        // Never silently dropped: a truncated prompt still comes back.
        let prompt = result.prompt.expect("over-budget section should be truncated, not dropped");
        assert!(prompt.contains("observational-memory"));
        assert!(result.session_tokens <= 10);
    }
}
