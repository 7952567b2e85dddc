//! Component J — process supervision, redeploy state machine, git polling.

pub mod deployer;
pub mod error;
pub mod git_poller;
pub mod notifier;
pub mod process;
pub mod session_monitor;
pub mod types;

pub use deployer::{DeploySignal, Deployer, DeployerState, DeployerStatus};
pub use error::{Result, SupervisorError};
pub use git_poller::GitPoller;
pub use notifier::Notifier;
pub use process::ProcessManager;
pub use session_monitor::SessionMonitor;
pub use types::{resolve_exit_action, ExitAction, ProcessConfig, ProcessState, ProcessStatus, RestartPolicy};
