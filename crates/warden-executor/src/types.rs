use warden_core::Role;

/// Latest prompt stashed while a thread's lock was held by another turn
/// — by-last-writer, replacement is explicit.
#[derive(Debug, Clone)]
pub struct PendingPrompt {
    pub prompt: String,
    pub msg_ts: String,
    pub role: Role,
    pub session_id: Option<String>,
}

/// Tools a turn is allowed to exercise, derived from role. Viewers never get
/// `Write`/`Edit`/`Bash`/`TodoWrite` regardless of what's configured for
/// admins — the allow-list is the only enforcement mechanism the CLI
/// exposes, so viewer mode means a fixed read-only allow-list rather than a
/// deny-list subtracted from "everything".
pub const VIEWER_TOOLS: &[&str] = &["Read", "Grep", "Glob", "WebFetch"];
const BLOCKED_FOR_VIEWER: &[&str] = &["Write", "Edit", "Bash", "TodoWrite"];

#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    pub allowed_tools: Vec<String>,
}

impl ToolPolicy {
    pub fn for_role(role: Role, admin_tools: &[String]) -> Self {
        match role {
            Role::Viewer => ToolPolicy { allowed_tools: VIEWER_TOOLS.iter().map(|s| s.to_string()).collect() },
            Role::Admin if admin_tools.is_empty() => ToolPolicy { allowed_tools: vec!["*".to_string()] },
            Role::Admin => ToolPolicy { allowed_tools: admin_tools.to_vec() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_policy_excludes_mutating_tools() {
        let policy = ToolPolicy::for_role(Role::Viewer, &[]);
        for blocked in BLOCKED_FOR_VIEWER {
            assert!(!policy.allowed_tools.contains(&blocked.to_string()));
        }
    }

    #[test]
    fn admin_with_no_configured_tools_gets_full_access() {
        let policy = ToolPolicy::for_role(Role::Admin, &[]);
        assert_eq!(policy.allowed_tools, vec!["*".to_string()]);
    }
}
