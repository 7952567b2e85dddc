use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use warden_agent::RunnerRegistry;
use warden_channels::ChannelObserver;
use warden_core::WardenConfig;
use warden_executor::{SessionExecutor, SessionExecutorConfig};
use warden_memory::{MemoryStore, ObservationPipeline};
use warden_sessions::SessionManager;
use warden_supervisor::{Deployer, DeploySignal, ExitAction, GitPoller, Notifier, ProcessConfig, ProcessManager, RestartPolicy, SessionMonitor};
use warden_tracker::{ListRunner, TrackerStore, TrackerWatcher, WatcherConfig};

mod app;
mod llm_anthropic;
mod slack;
mod trello;

use app::{AppState, RestartState};
use llm_anthropic::AnthropicLlmAdapter;
use slack::SlackChatAdapter;
use trello::TrelloTrackerAdapter;

const SUPERVISOR_RESTART_EXIT_CODE: i32 = 42;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warden_gateway=info,tower_http=debug".into()))
        .init();

    let config_path = std::env::var("WARDEN_CONFIG").ok();
    let config = WardenConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        WardenConfig::default()
    });

    let slack_bot_token = require_env("WARDEN_SLACK_BOT_TOKEN")?;
    let anthropic_api_key = require_env("WARDEN_ANTHROPIC_API_KEY")?;
    let anthropic_model = std::env::var("WARDEN_ANTHROPIC_MODEL").unwrap_or_else(|_| "claude-sonnet-4-5".to_string());
    let trello_key = require_env("WARDEN_TRELLO_KEY")?;
    let trello_token = require_env("WARDEN_TRELLO_TOKEN")?;
    let trello_board_id = require_env("WARDEN_TRELLO_BOARD_ID")?;
    let bot_user_id = std::env::var("WARDEN_BOT_USER_ID").unwrap_or_default();
    let admin_user_ids: Vec<String> = std::env::var("WARDEN_ADMIN_USER_IDS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let webhook_url = std::env::var("WARDEN_NOTIFIER_WEBHOOK_URL").ok();
    let repo_path = PathBuf::from(std::env::var("WARDEN_REPO_PATH").unwrap_or_else(|_| ".".to_string()));
    let git_remote = std::env::var("WARDEN_GIT_REMOTE").unwrap_or_else(|_| "origin".to_string());
    let git_branch = std::env::var("WARDEN_GIT_BRANCH").unwrap_or_else(|_| "main".to_string());

    let store_root = PathBuf::from(&config.store.root);
    let log_dir = PathBuf::from(&config.agent.log_dir);
    tokio::fs::create_dir_all(&store_root).await.ok();
    tokio::fs::create_dir_all(&log_dir).await.ok();

    // Core stores and adapters.
    let sessions = Arc::new(SessionManager::new(store_root.join("sessions.json")));
    let memory = Arc::new(MemoryStore::new(store_root.join("memory")));
    let tracker_store = Arc::new(TrackerStore::new(store_root.join("tracker")));
    let registry = Arc::new(RunnerRegistry::new());
    let list_runner = Arc::new(ListRunner::new(tracker_store.clone()));

    let chat: Arc<dyn warden_channels::ChatAdapter> = Arc::new(SlackChatAdapter::new(slack_bot_token));
    let llm: Arc<dyn warden_core::LlmAdapter> = Arc::new(AnthropicLlmAdapter::new(anthropic_api_key, anthropic_model, None));
    let tracker: Arc<dyn warden_tracker::TrackerAdapter> = Arc::new(TrelloTrackerAdapter::new(trello_board_id, trello_key, trello_token));

    let observer = Arc::new(ObservationPipeline::new(memory.clone(), llm.clone(), config.memory.clone()));
    let channel_observer = Arc::new(
        ChannelObserver::new(memory.clone(), chat.clone(), llm.clone(), config.channel.clone(), bot_user_id.clone())
            .with_session_manager(sessions.clone()),
    );

    let executor_config = SessionExecutorConfig {
        agent_binary: config.agent.binary.clone(),
        log_dir: config.agent.log_dir.clone(),
        mcp_bridge_path: std::env::var("WARDEN_MCP_BRIDGE_PATH").ok(),
        admin_tools: std::env::var("WARDEN_ADMIN_TOOLS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        max_context_tokens: config.memory.max_persistent_tokens,
        operator_thread_ts: std::env::var("WARDEN_OPERATOR_THREAD_TS").ok(),
    };
    let executor = Arc::new(SessionExecutor::new(
        sessions.clone(),
        memory.clone(),
        observer.clone(),
        chat.clone(),
        tracker.clone(),
        list_runner.clone(),
        registry.clone(),
        executor_config,
    ));

    let watch_lists = parse_watch_lists(&std::env::var("WARDEN_TRACKER_WATCH_LISTS").unwrap_or_default());
    let watcher_config = WatcherConfig {
        watch_lists,
        in_progress_list_id: std::env::var("WARDEN_TRACKER_IN_PROGRESS_LIST_ID").unwrap_or_default(),
        review_list_id: std::env::var("WARDEN_TRACKER_REVIEW_LIST_ID").unwrap_or_default(),
        done_list_id: std::env::var("WARDEN_TRACKER_DONE_LIST_ID").unwrap_or_default(),
        operational_list_ids: Default::default(),
        notify_channel_id: std::env::var("WARDEN_TRACKER_NOTIFY_CHANNEL_ID").unwrap_or_default(),
    };
    let tracker_watcher = Arc::new(TrackerWatcher::new(
        tracker.clone(),
        tracker_store.clone(),
        executor.clone() as Arc<dyn warden_tracker::TurnRunner>,
        list_runner.clone(),
        chat.clone(),
        watcher_config,
    ));

    // Supervisor components.
    let process_manager = Arc::new(ProcessManager::new());
    for cfg in build_process_configs(&config) {
        process_manager.register(cfg)?;
    }
    for name in process_manager.registered_names() {
        process_manager.start(&name)?;
    }

    let session_monitor = Arc::new(SessionMonitor::new(config.agent.binary.clone()));
    let notifier = Arc::new(Notifier::new(webhook_url));
    let deployer = Arc::new(Deployer::new(
        process_manager.clone(),
        session_monitor.clone(),
        notifier.clone(),
        repo_path.clone(),
        git_remote.clone(),
        git_branch.clone(),
        Duration::from_secs(config.supervisor.waiting_sessions_timeout_secs),
    ));
    let git_poller = Arc::new(tokio::sync::Mutex::new(GitPoller::new(repo_path, git_remote, git_branch)));

    let state = Arc::new(AppState {
        process_manager: process_manager.clone(),
        deployer: deployer.clone(),
        git_poller: git_poller.clone(),
        session_monitor: session_monitor.clone(),
        log_dir,
        restart_state: RestartState::new(),
        executor: executor.clone(),
        admin_user_ids,
    });

    let observed_channels: Vec<String> = std::env::var("WARDEN_OBSERVED_CHANNELS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    spawn_tracker_poll_loop(tracker_watcher, config.tracker.poll_interval_secs);
    spawn_channel_observer_loop(channel_observer, observed_channels, config.tracker.poll_interval_secs);
    spawn_memory_consolidation_loop(observer, config.memory.consolidation_interval_secs);
    spawn_supervisor_loop(process_manager.clone(), deployer, git_poller, config.supervisor.clone(), config.supervisor.git_poll_interval_secs);
    spawn_shutdown_handler(process_manager);

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let router = app::build_router(state);

    info!("warden gateway listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn require_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("missing required environment variable {name}"))
}

/// Parses `"key1:id1,key2:id2"` into the watcher's `(list_key, list_id)` pairs.
fn parse_watch_lists(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| {
            let (key, id) = entry.split_once(':')?;
            let (key, id) = (key.trim(), id.trim());
            if key.is_empty() || id.is_empty() {
                None
            } else {
                Some((key.to_string(), id.to_string()))
            }
        })
        .collect()
}

/// Builds the set of processes this supervisor keeps alive. Unlike the
/// Python original's hardcoded bot/MCP-server fleet, the process list here
/// comes from a simple env-driven spec so it isn't tied to one deployment.
fn build_process_configs(config: &WardenConfig) -> Vec<ProcessConfig> {
    let Ok(raw) = std::env::var("WARDEN_SUPERVISED_PROCESSES") else {
        return Vec::new();
    };
    raw.split(';')
        .filter_map(|entry| {
            let mut parts = entry.split('|');
            let name = parts.next()?.trim().to_string();
            let command = parts.next()?.trim().to_string();
            if name.is_empty() || command.is_empty() {
                return None;
            }
            let args: Vec<String> = parts.next().map(|a| a.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()).unwrap_or_default();
            Some(ProcessConfig {
                name,
                command,
                args,
                cwd: None,
                env: Default::default(),
                restart_policy: RestartPolicy::default(),
                log_dir: Some(PathBuf::from(&config.agent.log_dir)),
                shutdown_url: None,
                port: None,
            })
        })
        .collect()
}

fn spawn_tracker_poll_loop(watcher: Arc<TrackerWatcher>, poll_interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(poll_interval_secs.max(1)));
        loop {
            interval.tick().await;
            watcher.tick().await;
        }
    });
}

/// Runs one `ChannelObserver` pass per configured channel on the tracker's
/// poll cadence. The direct-mention thread set is left empty here — H's own
/// mention handling runs off the webhook path and doesn't share state with
/// this loop, so the judge may occasionally double-react to a thread H is
/// already driving; that's a stale-reaction false positive, not a crash.
fn spawn_channel_observer_loop(observer: Arc<ChannelObserver>, channels: Vec<String>, poll_interval_secs: u64) {
    if channels.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(poll_interval_secs.max(1)));
        loop {
            interval.tick().await;
            for channel_id in &channels {
                if let Err(e) = observer.run(channel_id, &Default::default()).await {
                    warn!(channel = %channel_id, error = %e, "channel observer pass failed");
                }
            }
        }
    });
}

/// Runs the Promoter/Compactor sweep on a slow, independent cadence —
/// unlike Reflector (which runs per-turn right after Observer in
/// `SessionExecutor::observe_turn`), these two stages operate across every
/// thread's candidates and the single persistent-memory document, so they
/// don't belong to any one turn.
fn spawn_memory_consolidation_loop(observer: Arc<ObservationPipeline>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            observer.promote().await;
            observer.compact_persistent().await;
        }
    });
}

fn spawn_supervisor_loop(
    process_manager: Arc<ProcessManager>,
    deployer: Arc<Deployer>,
    git_poller: Arc<tokio::sync::Mutex<GitPoller>>,
    supervisor_config: warden_core::config::SupervisorConfig,
    git_poll_interval_secs: u64,
) {
    tokio::spawn(async move {
        let mut last_git_check = tokio::time::Instant::now();
        let git_poll_interval = Duration::from_secs(git_poll_interval_secs);
        loop {
            tokio::time::sleep(Duration::from_secs(supervisor_config.health_check_interval_secs)).await;

            for name in process_manager.registered_names() {
                let Some(exit_code) = process_manager.poll(&name) else { continue };
                let Some(action) = process_manager.exit_action(&name, Some(exit_code)) else { continue };

                info!(process = %name, exit_code, ?action, "process exited");
                match action {
                    ExitAction::Shutdown => info!(process = %name, "clean exit, not restarting"),
                    ExitAction::Update => {
                        deployer.notify_change().await;
                        if let Some(DeploySignal::SupervisorRestartRequired) = deployer.tick().await {
                            process_manager.stop_all(Duration::from_secs(10)).await;
                            std::process::exit(SUPERVISOR_RESTART_EXIT_CODE);
                        }
                    }
                    ExitAction::Restart => {
                        if let Err(e) = process_manager.restart(&name).await {
                            warn!(process = %name, error = %e, "restart failed");
                        }
                    }
                    ExitAction::RestartDelay => {
                        let delay = process_manager.restart_delay(&name);
                        tokio::time::sleep(delay).await;
                        if let Err(e) = process_manager.restart(&name).await {
                            warn!(process = %name, error = %e, "restart failed");
                        }
                    }
                }
            }

            if last_git_check.elapsed() >= git_poll_interval {
                last_git_check = tokio::time::Instant::now();
                let changed = git_poller.lock().await.check().await;
                if changed {
                    deployer.notify_change().await;
                }
            }

            if let Some(DeploySignal::SupervisorRestartRequired) = deployer.tick().await {
                process_manager.stop_all(Duration::from_secs(10)).await;
                std::process::exit(SUPERVISOR_RESTART_EXIT_CODE);
            }
        }
    });
}

fn spawn_shutdown_handler(process_manager: Arc<ProcessManager>) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        info!("shutdown signal received, stopping all processes");
        process_manager.stop_all(Duration::from_secs(10)).await;
        std::process::exit(0);
    });
}
