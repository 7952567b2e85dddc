use std::collections::HashMap;

use tracing::warn;

/// Counts live agent-CLI sessions by walking this process's own descendant
/// tree in `/proc`, grounded on
/// the Python original's `psutil.Process(pid).children(recursive=True)` walk
/// and on the `procfs` crate's `all_processes()` + `stat()` used the same way
/// in the example process-monitor TUI.
pub struct SessionMonitor {
    root_pid: i32,
    agent_binary: String,
}

impl SessionMonitor {
    pub fn new(agent_binary: impl Into<String>) -> Self {
        Self { root_pid: std::process::id() as i32, agent_binary: agent_binary.into() }
    }

    #[cfg(test)]
    fn with_root_pid(agent_binary: impl Into<String>, root_pid: i32) -> Self {
        Self { root_pid, agent_binary: agent_binary.into() }
    }

    /// Number of running processes, anywhere under this process's tree,
    /// whose `comm` matches the configured agent binary name.
    pub fn active_session_count(&self) -> u32 {
        let all = match procfs::process::all_processes() {
            Ok(iter) => iter,
            Err(e) => {
                warn!(error = %e, "failed to enumerate /proc, assuming 0 active sessions");
                return 0;
            }
        };

        let mut children_of: HashMap<i32, Vec<(i32, String)>> = HashMap::new();
        for proc in all.flatten() {
            if let Ok(stat) = proc.stat() {
                children_of.entry(stat.ppid).or_default().push((stat.pid, stat.comm));
            }
        }

        let stem = self.agent_binary_stem();
        let mut count = 0u32;
        let mut stack = vec![self.root_pid];
        let mut visited = std::collections::HashSet::new();
        while let Some(pid) = stack.pop() {
            if !visited.insert(pid) {
                continue;
            }
            let Some(children) = children_of.get(&pid) else { continue };
            for (child_pid, comm) in children {
                if comm == &stem || comm == &self.agent_binary {
                    count += 1;
                }
                stack.push(*child_pid);
            }
        }
        count
    }

    pub fn is_safe_to_deploy(&self) -> bool {
        self.active_session_count() == 0
    }

    fn agent_binary_stem(&self) -> String {
        std::path::Path::new(&self.agent_binary)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.agent_binary.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_rooted_at_unused_pid_reports_zero() {
        let monitor = SessionMonitor::with_root_pid("claude", i32::MAX - 1);
        assert_eq!(monitor.active_session_count(), 0);
        assert!(monitor.is_safe_to_deploy());
    }

    #[test]
    fn monitor_rooted_at_current_process_does_not_panic() {
        let monitor = SessionMonitor::new("claude");
        let _ = monitor.active_session_count();
    }
}
