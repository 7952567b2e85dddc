use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::notifier::Notifier;
use crate::process::ProcessManager;
use crate::session_monitor::SessionMonitor;

const SUPERVISOR_SOURCE_PREFIX: &str = "src/supervisor/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployerState {
    Idle,
    Pending,
    WaitingSessions,
    Deploying,
}

/// Signal returned from `tick()` when the supervisor's own code changed and
/// it must restart itself rather than just redeploy its children (spec
/// §4.J: "process exits 42 so a watchdog restarts the supervisor").
pub enum DeploySignal {
    SupervisorRestartRequired,
}

#[derive(Debug, Serialize)]
pub struct DeployerStatus {
    pub state: DeployerState,
    pub waiting_since_secs_ago: Option<u64>,
}

/// Redeploy state machine: `idle → pending → waiting_sessions → deploying →
/// idle`.
pub struct Deployer {
    process_manager: Arc<ProcessManager>,
    session_monitor: Arc<SessionMonitor>,
    notifier: Arc<Notifier>,
    repo_path: PathBuf,
    remote: String,
    branch: String,
    post_pull: Option<(String, Vec<String>)>,
    waiting_timeout: Duration,
    state: Mutex<DeployerState>,
    waiting_since: Mutex<Option<Instant>>,
}

impl Deployer {
    pub fn new(
        process_manager: Arc<ProcessManager>,
        session_monitor: Arc<SessionMonitor>,
        notifier: Arc<Notifier>,
        repo_path: PathBuf,
        remote: impl Into<String>,
        branch: impl Into<String>,
        waiting_timeout: Duration,
    ) -> Self {
        Self {
            process_manager,
            session_monitor,
            notifier,
            repo_path,
            remote: remote.into(),
            branch: branch.into(),
            post_pull: None,
            waiting_timeout,
            state: Mutex::new(DeployerState::Idle),
            waiting_since: Mutex::new(None),
        }
    }

    /// Configure a language-equivalent post-pull build/install step (e.g.
    /// `cargo build --release`), run after `git pull` and before restart.
    pub fn with_post_pull_command(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.post_pull = Some((command.into(), args));
        self
    }

    pub async fn status(&self) -> DeployerStatus {
        let state = *self.state.lock().await;
        let waiting_since_secs_ago = self.waiting_since.lock().await.map(|t| t.elapsed().as_secs());
        DeployerStatus { state, waiting_since_secs_ago }
    }

    /// Pushes `idle → pending`. A no-op from any other state — a change
    /// already being processed doesn't need re-announcing.
    pub async fn notify_change(&self) {
        let mut state = self.state.lock().await;
        if *state != DeployerState::Idle {
            return;
        }
        *state = DeployerState::Pending;
        drop(state);
        info!("deploy state: idle -> pending");
        let commits = self.pending_commits().await;
        self.notifier.notify_change_detected(&commits).await;
    }

    /// Advances the state machine one step. Returns `Some(signal)` only when
    /// the caller must stop everything and exit the process.
    pub async fn tick(&self) -> Option<DeploySignal> {
        let state = *self.state.lock().await;
        match state {
            DeployerState::Idle => None,
            DeployerState::Deploying => None,
            DeployerState::Pending => {
                if self.session_monitor.is_safe_to_deploy() {
                    self.execute_deploy().await
                } else {
                    *self.state.lock().await = DeployerState::WaitingSessions;
                    *self.waiting_since.lock().await = Some(Instant::now());
                    info!("deploy state: pending -> waiting_sessions");
                    self.notifier.notify_waiting_sessions().await;
                    None
                }
            }
            DeployerState::WaitingSessions => {
                let timed_out = self
                    .waiting_since
                    .lock()
                    .await
                    .map(|t| t.elapsed() >= self.waiting_timeout)
                    .unwrap_or(true);
                if self.session_monitor.is_safe_to_deploy() || timed_out {
                    self.execute_deploy().await
                } else {
                    None
                }
            }
        }
    }

    async fn execute_deploy(&self) -> Option<DeploySignal> {
        *self.state.lock().await = DeployerState::Deploying;
        *self.waiting_since.lock().await = None;
        info!("deploy state: -> deploying");

        let changed = self.changed_paths().await;
        if changed.iter().any(|p| p.starts_with(SUPERVISOR_SOURCE_PREFIX)) {
            warn!("supervisor's own sources changed, restarting self instead of redeploying children");
            self.process_manager.stop_all(Duration::from_secs(10)).await;
            *self.state.lock().await = DeployerState::Idle;
            return Some(DeploySignal::SupervisorRestartRequired);
        }

        let commits = self.pending_commits().await;
        self.notifier.notify_deploy_start(&commits).await;

        let result = self.do_update().await;
        self.process_manager.stop_all(Duration::from_secs(10)).await;
        for name in self.process_manager.registered_names() {
            if let Err(e) = self.process_manager.start(&name) {
                error!(process = %name, error = %e, "failed to restart after deploy");
            }
        }

        match result {
            Ok(()) => self.notifier.notify_deploy_success().await,
            Err(e) => {
                error!(error = %e, "deploy failed, children restarted anyway");
                self.notifier.notify_deploy_failure(&e).await;
            }
        }

        *self.state.lock().await = DeployerState::Idle;
        info!("deploy state: deploying -> idle");
        None
    }

    async fn do_update(&self) -> std::result::Result<(), String> {
        let pull = self.git(&["pull", &self.remote, &self.branch]).await;
        if let Err(e) = pull {
            warn!(error = %e, "git pull failed, retrying after stash");
            self.git(&["stash"]).await.map_err(|e| e.to_string())?;
            self.git(&["pull", &self.remote, &self.branch]).await.map_err(|e| e.to_string())?;
        }

        if let Some((cmd, args)) = &self.post_pull {
            let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
            let output = tokio::process::Command::new(cmd)
                .args(&args_ref)
                .current_dir(&self.repo_path)
                .output()
                .await
                .map_err(|e| e.to_string())?;
            if !output.status.success() {
                return Err(format!("post-pull command failed: {}", String::from_utf8_lossy(&output.stderr)));
            }
        }
        Ok(())
    }

    async fn changed_paths(&self) -> Vec<String> {
        let spec = format!("HEAD..{}/{}", self.remote, self.branch);
        match self.git(&["diff", "--name-only", &spec]).await {
            Ok(output) => String::from_utf8_lossy(&output).lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn pending_commits(&self) -> Vec<String> {
        let spec = format!("HEAD..{}/{}", self.remote, self.branch);
        match self.git(&["log", "--oneline", "--no-decorate", &spec]).await {
            Ok(output) => String::from_utf8_lossy(&output).lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn git(&self, args: &[&str]) -> std::io::Result<Vec<u8>> {
        let output = tokio::process::Command::new("git").args(args).current_dir(&self.repo_path).output().await?;
        if !output.status.success() {
            return Err(std::io::Error::other(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_deployer(repo: PathBuf) -> Deployer {
        Deployer::new(
            Arc::new(ProcessManager::new()),
            Arc::new(SessionMonitor::new("claude")),
            Arc::new(Notifier::new(None)),
            repo,
            "origin",
            "main",
            Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn notify_change_moves_idle_to_pending_once() {
        let deployer = make_deployer(PathBuf::from("."));
        assert_eq!(deployer.status().await.state, DeployerState::Idle);
        deployer.notify_change().await;
        assert_eq!(deployer.status().await.state, DeployerState::Pending);
        // a second notify while already pending is a no-op, not a re-announce
        deployer.notify_change().await;
        assert_eq!(deployer.status().await.state, DeployerState::Pending);
    }

    #[tokio::test]
    async fn tick_on_idle_does_nothing() {
        let deployer = make_deployer(PathBuf::from("."));
        assert!(deployer.tick().await.is_none());
        assert_eq!(deployer.status().await.state, DeployerState::Idle);
    }

    #[tokio::test]
    async fn waiting_sessions_times_out_and_proceeds() {
        let deployer = make_deployer(PathBuf::from("/nonexistent/warden-test-repo"));
        *deployer.state.lock().await = DeployerState::WaitingSessions;
        *deployer.waiting_since.lock().await = Some(Instant::now() - Duration::from_secs(601));
        deployer.tick().await;
        // changed_paths/pending_commits fail closed against a nonexistent repo,
        // so execute_deploy runs the no-op path through to idle.
        assert_eq!(deployer.status().await.state, DeployerState::Idle);
    }
}
