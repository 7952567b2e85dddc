use std::collections::HashMap;
use std::path::PathBuf;

/// What to do once a child process exits, keyed by its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Clean exit (code 0). Do not restart.
    Shutdown,
    /// Code 42 — deploy-triggered exit. Run the deployer instead of a plain restart.
    Update,
    /// Code 43 — restart immediately, no delay.
    Restart,
    /// Any other code, or a policy that ignores exit codes — restart after a delay.
    RestartDelay,
}

pub fn resolve_exit_action(exit_code: Option<i32>, policy: &RestartPolicy) -> ExitAction {
    let Some(code) = exit_code else {
        return ExitAction::RestartDelay;
    };
    if !policy.use_exit_codes {
        return if policy.auto_restart { ExitAction::RestartDelay } else { ExitAction::Shutdown };
    }
    match code {
        0 => ExitAction::Shutdown,
        42 => ExitAction::Update,
        43 => ExitAction::Restart,
        _ => ExitAction::RestartDelay,
    }
}

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub use_exit_codes: bool,
    pub auto_restart: bool,
    pub restart_delay_secs: u64,
    pub max_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self { use_exit_codes: false, auto_restart: true, restart_delay_secs: 5, max_restarts: 0 }
    }
}

/// A registered process: command line, working directory, environment, restart policy
///. Log files are named `<log_dir>/<name>-{out,error}.log`.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub log_dir: Option<PathBuf>,
    pub shutdown_url: Option<String>,
    pub port: Option<u16>,
}

impl ProcessConfig {
    pub fn stdout_log(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|d| d.join(format!("{}-out.log", self.name)))
    }

    pub fn stderr_log(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|d| d.join(format!("{}-error.log", self.name)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Stopped,
    Running,
    Restarting,
    Dead,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessState {
    #[serde(skip)]
    pub config: ProcessConfig,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
}

impl ProcessState {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config, status: ProcessStatus::Stopped, pid: None, restart_count: 0, last_exit_code: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_zero_means_shutdown() {
        let policy = RestartPolicy { use_exit_codes: true, ..Default::default() };
        assert_eq!(resolve_exit_action(Some(0), &policy), ExitAction::Shutdown);
    }

    #[test]
    fn exit_code_42_means_update() {
        let policy = RestartPolicy { use_exit_codes: true, ..Default::default() };
        assert_eq!(resolve_exit_action(Some(42), &policy), ExitAction::Update);
    }

    #[test]
    fn exit_code_43_means_restart() {
        let policy = RestartPolicy { use_exit_codes: true, ..Default::default() };
        assert_eq!(resolve_exit_action(Some(43), &policy), ExitAction::Restart);
    }

    #[test]
    fn unmapped_code_falls_back_to_restart_delay() {
        let policy = RestartPolicy { use_exit_codes: true, ..Default::default() };
        assert_eq!(resolve_exit_action(Some(17), &policy), ExitAction::RestartDelay);
    }

    #[test]
    fn policy_ignoring_exit_codes_always_restarts_with_delay_when_auto_restart() {
        let policy = RestartPolicy { use_exit_codes: false, auto_restart: true, ..Default::default() };
        assert_eq!(resolve_exit_action(Some(0), &policy), ExitAction::RestartDelay);
    }

    #[test]
    fn policy_ignoring_exit_codes_and_auto_restart_shuts_down() {
        let policy = RestartPolicy { use_exit_codes: false, auto_restart: false, ..Default::default() };
        assert_eq!(resolve_exit_action(Some(1), &policy), ExitAction::Shutdown);
    }
}
