use serde::{Deserialize, Serialize};

/// Observation/candidate priority — rendered as an emoji in chat-facing tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[serde(rename = "🔴")]
    Red,
    #[serde(rename = "🟡")]
    Yellow,
    #[serde(rename = "🟢")]
    Green,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Red => "🔴",
            Priority::Yellow => "🟡",
            Priority::Green => "🟢",
        };
        write!(f, "{s}")
    }
}

/// Where an observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSource {
    Observer,
    Migrated,
}

/// One entry in a MemoryRecord's `observations` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub priority: Priority,
    pub content: String,
    pub session_date: String,
    pub created_at: String,
    pub source: ObservationSource,
}

/// One entry awaiting promotion to persistent memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub ts: String,
    pub priority: Priority,
    pub content: String,
}

/// MemoryRecord — per-thread observational memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub thread_ts: String,
    pub user_id: String,
    pub username: String,
    pub anchor_ts: Option<String>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub reflection_count: u32,
    #[serde(default)]
    pub total_sessions_observed: u32,
}

impl MemoryRecord {
    pub fn new(thread_ts: impl Into<String>, user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            thread_ts: thread_ts.into(),
            user_id: user_id.into(),
            username: username.into(),
            anchor_ts: None,
            observations: Vec::new(),
            reflection_count: 0,
            total_sessions_observed: 0,
        }
    }
}

/// One item of persistent memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentItem {
    pub id: String,
    pub priority: Priority,
    pub content: String,
    pub promoted_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistentMeta {
    pub token_count: u32,
}

/// PersistentMemory — single document per user/process scope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistentMemory {
    #[serde(default)]
    pub content: Vec<PersistentItem>,
    #[serde(default)]
    pub meta: PersistentMeta,
}

/// A single channel message as buffered for the ChannelObserver pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub ts: String,
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub is_bot: bool,
    /// Set when this message belongs to a thread rooted at another ts.
    pub thread_ts: Option<String>,
}

/// Rolling digest of prior channel chatter.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Digest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub meta: PersistentMeta,
    pub last_digested_at: Option<String>,
    pub last_compressed_at: Option<String>,
}

/// Intervention history entry, pruned at write-time to the last 2 hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionEvent {
    pub at: chrono::DateTime<chrono::Utc>,
    pub kind: InterventionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionKind {
    React,
    Message,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InterventionHistory {
    #[serde(default)]
    pub events: Vec<InterventionEvent>,
}
