use serde::{Deserialize, Serialize};

/// Parameters for one `AgentRunner::run` invocation.
pub struct RunOptions {
    pub prompt: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub thread_ts: String,
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Usage {
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Outcome of a turn. The runner never interprets marker tokens in `output`
/// (e.g. `<!-- UPDATE -->`) — that belongs to H.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub success: bool,
    pub output: String,
    pub session_id: Option<String>,
    pub error: Option<String>,
    pub interrupted: bool,
    pub usage: Option<Usage>,
    pub collected_messages: Vec<String>,
    pub anchor_ts: Option<String>,
}

/// One line of the subprocess's typed JSONL protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    System {
        session_id: String,
    },
    Assistant {
        #[serde(default)]
        blocks: Vec<ContentBlock>,
    },
    Result {
        #[serde(default)]
        text: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        usage: Option<Usage>,
    },
    RateLimit {
        status: String,
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    ToolResult { content: String },
}

/// Entry pushed to the caller's `compact_events` list when a rate-limit
/// warning arrives mid-turn, consumed by the retry loop in `run` after the
/// receive iterator exits if the turn never otherwise succeeds. Distinct
/// from the immediate, unconditional `on_rate_limit_warning` callback in
/// `AgentRunner::run`, which forwards the same note to the chat debug
/// channel regardless of whether a retry ever happens.
#[derive(Debug, Clone)]
pub struct CompactEvent {
    pub trigger: String,
    pub note: String,
}
