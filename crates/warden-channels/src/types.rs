use serde::{Deserialize, Serialize};

/// One reaction/intervene recommendation returned by the Judge LLM call.
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeItem {
    pub ts: String,
    pub reaction_type: ReactionType,
    pub importance: u8,
    #[serde(default)]
    pub emoji_name: Option<String>,
    #[serde(default)]
    pub linked_message_ts: Option<String>,
    #[serde(default)]
    pub related_to_me: bool,
    #[serde(default)]
    pub addressed_to_me: bool,
    #[serde(default)]
    pub sender_is_bot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionType {
    React,
    Intervene,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JudgeResponse {
    #[serde(default)]
    pub items: Vec<JudgeItem>,
}
