use serde::{Deserialize, Serialize};
use warden_core::{Role, SourceType};

/// The bond between a chat thread and an agent session.
///
/// `thread_ts` is the primary key — the chat-thread anchor timestamp.
/// `session_id` is assigned by the agent and is nullable until the first
/// turn completes; once non-null it only ever changes to a new value
/// returned by the agent post-compact, never clears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub thread_ts: String,
    pub channel_id: String,
    pub session_id: Option<String>,
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub source_type: SourceType,
    pub message_count: u32,
    pub created_at: String,
    pub last_active_at: String,
    /// True while a D invocation is actively running for this thread — used
    /// by J to compute `get_running_session_count` for deploy readiness.
    #[serde(default)]
    pub running: bool,
}

impl Session {
    pub fn new(
        thread_ts: impl Into<String>,
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
        role: Role,
        source_type: SourceType,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            thread_ts: thread_ts.into(),
            channel_id: channel_id.into(),
            session_id: None,
            user_id: user_id.into(),
            username: username.into(),
            role,
            source_type,
            message_count: 0,
            created_at: now.clone(),
            last_active_at: now,
            running: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_no_session_id_yet() {
        let s = Session::new("T1", "C1", "U1", "alice", Role::Viewer, SourceType::Mention);
        assert!(s.session_id.is_none());
        assert_eq!(s.message_count, 0);
    }
}
