use std::fs::OpenOptions;
use std::process::Stdio;
use std::time::Duration;

use dashmap::DashMap;
use tokio::process::Child;
use tracing::{info, warn};

use crate::error::{Result, SupervisorError};
use crate::types::{resolve_exit_action, ExitAction, ProcessConfig, ProcessState, ProcessStatus};

/// Spawns, polls, and tears down the registered child processes. State and the live
/// `Child` handle are split across two maps so `status()` can be read
/// without holding a lock over a running subprocess.
pub struct ProcessManager {
    states: DashMap<String, ProcessState>,
    children: DashMap<String, Child>,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        Self { states: DashMap::new(), children: DashMap::new() }
    }

    pub fn register(&self, config: ProcessConfig) -> Result<()> {
        if self.states.contains_key(&config.name) {
            return Err(SupervisorError::AlreadyRegistered(config.name));
        }
        let name = config.name.clone();
        self.states.insert(name, ProcessState::new(config));
        Ok(())
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.states.iter().map(|e| e.key().clone()).collect()
    }

    fn open_logs(config: &ProcessConfig) -> Option<(Stdio, Stdio)> {
        let (stdout_path, stderr_path) = (config.stdout_log()?, config.stderr_log()?);
        if let Some(parent) = stdout_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let stdout = OpenOptions::new().create(true).append(true).open(&stdout_path).ok()?;
        let stderr = OpenOptions::new().create(true).append(true).open(&stderr_path).ok()?;
        Some((Stdio::from(stdout), Stdio::from(stderr)))
    }

    pub fn start(&self, name: &str) -> Result<()> {
        let mut state = self.states.get_mut(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        if state.status == ProcessStatus::Running {
            warn!(process = name, pid = ?state.pid, "already running");
            return Ok(());
        }

        let config = state.config.clone();
        let (stdout, stderr) = Self::open_logs(&config).unwrap_or((Stdio::null(), Stdio::null()));

        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args).envs(&config.env).stdout(stdout).stderr(stderr).stdin(Stdio::null());
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        match cmd.spawn() {
            Ok(child) => {
                state.pid = child.id();
                state.status = ProcessStatus::Running;
                info!(process = name, pid = ?state.pid, "started");
                self.children.insert(name.to_string(), child);
                Ok(())
            }
            Err(e) => {
                state.status = ProcessStatus::Dead;
                warn!(process = name, error = %e, "failed to start");
                Err(SupervisorError::Io(e))
            }
        }
    }

    pub async fn stop(&self, name: &str, timeout: Duration) -> Result<Option<i32>> {
        let exists = self.states.contains_key(name);
        if !exists {
            return Err(SupervisorError::NotFound(name.to_string()));
        }
        let Some((_, mut child)) = self.children.remove(name) else {
            return Ok(None);
        };

        info!(process = name, "stopping");
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        let exit_code = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                warn!(process = name, error = %e, "wait failed");
                None
            }
            Err(_) => {
                warn!(process = name, "terminate timed out, killing");
                let _ = child.kill().await;
                child.wait().await.ok().and_then(|s| s.code())
            }
        };

        if let Some(mut state) = self.states.get_mut(name) {
            state.status = ProcessStatus::Stopped;
            state.last_exit_code = exit_code;
            state.pid = None;
        }
        info!(process = name, exit_code = ?exit_code, "stopped");
        Ok(exit_code)
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        if let Some(mut state) = self.states.get_mut(name) {
            state.status = ProcessStatus::Restarting;
            state.restart_count += 1;
        } else {
            return Err(SupervisorError::NotFound(name.to_string()));
        }
        self.stop(name, Duration::from_secs(10)).await?;
        self.start(name)
    }

    /// Reap a process that exited on its own. Returns `Some(exit_code)` only
    /// on the poll that first observes the exit, `None` otherwise (so a
    /// health-check loop never double-handles the same exit).
    pub fn poll(&self, name: &str) -> Option<i32> {
        let mut child_ref = self.children.get_mut(name)?;
        match child_ref.try_wait() {
            Ok(Some(status)) => {
                drop(child_ref);
                self.children.remove(name);
                let code = status.code();
                if let Some(mut state) = self.states.get_mut(name) {
                    state.status = ProcessStatus::Stopped;
                    state.last_exit_code = code;
                    state.pid = None;
                }
                info!(process = name, exit_code = ?code, "exited on its own");
                code
            }
            Ok(None) => None,
            Err(e) => {
                warn!(process = name, error = %e, "try_wait failed");
                None
            }
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.states.get(name).map(|s| s.status == ProcessStatus::Running).unwrap_or(false)
    }

    pub fn exit_action(&self, name: &str, exit_code: Option<i32>) -> Option<ExitAction> {
        let state = self.states.get(name)?;
        Some(resolve_exit_action(exit_code, &state.config.restart_policy))
    }

    pub fn restart_delay(&self, name: &str) -> Duration {
        self.states
            .get(name)
            .map(|s| Duration::from_secs(s.config.restart_policy.restart_delay_secs))
            .unwrap_or(Duration::from_secs(5))
    }

    pub fn status(&self) -> Vec<ProcessState> {
        self.states.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn stop_all(&self, timeout: Duration) {
        for name in self.registered_names() {
            if let Err(e) = self.stop(&name, timeout).await {
                warn!(process = %name, error = %e, "error stopping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RestartPolicy;
    use std::collections::HashMap;

    fn echo_config(name: &str) -> ProcessConfig {
        ProcessConfig {
            name: name.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 5".to_string()],
            cwd: None,
            env: HashMap::new(),
            restart_policy: RestartPolicy::default(),
            log_dir: None,
            shutdown_url: None,
            port: None,
        }
    }

    #[test]
    fn double_registration_is_rejected() {
        let pm = ProcessManager::new();
        pm.register(echo_config("a")).unwrap();
        assert!(pm.register(echo_config("a")).is_err());
    }

    #[tokio::test]
    async fn start_stop_transitions_status() {
        let pm = ProcessManager::new();
        pm.register(echo_config("a")).unwrap();
        pm.start("a").unwrap();
        assert!(pm.is_running("a"));
        let code = pm.stop("a", Duration::from_secs(2)).await.unwrap();
        assert!(!pm.is_running("a"));
        assert!(code.is_some() || code.is_none());
    }

    #[tokio::test]
    async fn poll_reaps_self_exited_process() {
        let pm = ProcessManager::new();
        let mut cfg = echo_config("b");
        cfg.args = vec!["-c".to_string(), "exit 0".to_string()];
        pm.register(cfg).unwrap();
        pm.start("b").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let code = pm.poll("b");
        assert_eq!(code, Some(0));
        assert_eq!(pm.poll("b"), None);
    }

    #[test]
    fn exit_action_maps_configured_code() {
        let pm = ProcessManager::new();
        let mut cfg = echo_config("c");
        cfg.restart_policy.use_exit_codes = true;
        pm.register(cfg).unwrap();
        assert_eq!(pm.exit_action("c", Some(42)), Some(ExitAction::Update));
    }
}
