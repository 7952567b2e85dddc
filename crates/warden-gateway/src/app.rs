use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use warden_core::{Role, SourceType};
use warden_executor::SessionExecutor;
use warden_supervisor::{Deployer, ProcessManager, SessionMonitor};

const RESTART_COOLDOWN: Duration = Duration::from_secs(60);
const VALID_PROCESS_ACTIONS: &[&str] = &["start", "stop", "restart"];

/// Tracks the supervisor's own-restart cooldown. Kept in the dashboard
/// process rather than the supervisor loop since only HTTP handlers touch it.
pub struct RestartState {
    last_restart: Mutex<Option<Instant>>,
}

impl RestartState {
    pub fn new() -> Self {
        Self { last_restart: Mutex::new(None) }
    }

    fn cooldown_remaining(&self) -> Duration {
        let guard = self.last_restart.lock().unwrap();
        match *guard {
            None => Duration::ZERO,
            Some(t) => RESTART_COOLDOWN.saturating_sub(t.elapsed()),
        }
    }

    /// Atomically checks the cooldown and marks a restart if it passes.
    /// Returns the remaining cooldown (zero means the restart was accepted).
    fn try_mark_restart(&self) -> Duration {
        let mut guard = self.last_restart.lock().unwrap();
        if let Some(t) = *guard {
            let remaining = RESTART_COOLDOWN.saturating_sub(t.elapsed());
            if !remaining.is_zero() {
                return remaining;
            }
        }
        *guard = Some(Instant::now());
        Duration::ZERO
    }
}

impl Default for RestartState {
    fn default() -> Self {
        Self::new()
    }
}

/// Central shared state, handed to every Axum handler as `Arc<AppState>`.
pub struct AppState {
    pub process_manager: Arc<ProcessManager>,
    pub deployer: Arc<Deployer>,
    pub git_poller: Arc<tokio::sync::Mutex<warden_supervisor::GitPoller>>,
    pub session_monitor: Arc<SessionMonitor>,
    pub log_dir: PathBuf,
    pub restart_state: RestartState,
    pub executor: Arc<SessionExecutor>,
    pub admin_user_ids: Vec<String>,
}

impl AppState {
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_ids.iter().any(|id| id == user_id)
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/process/{name}/{action}", post(process_control_handler))
        .route("/api/deploy", post(deploy_trigger_handler))
        .route("/api/supervisor/restart", post(supervisor_restart_handler))
        .route("/api/logs/{name}", get(logs_handler))
        .route("/webhooks/slack", post(slack_webhook_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let processes = state.process_manager.status();
    let deploy = state.deployer.status().await;
    let git = state.git_poller.lock().await;
    let local = git.local_head();
    let remote = git.remote_head();
    Json(json!({
        "processes": processes,
        "deploy": deploy,
        "git": {
            "local_head": local,
            "remote_head": remote,
            "has_changes": local != remote,
        },
        "supervisor": {
            "cooldown_remaining": state.restart_state.cooldown_remaining().as_secs_f64(),
            "active_sessions_count": state.session_monitor.active_session_count(),
        },
    }))
}

async fn process_control_handler(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
) -> impl IntoResponse {
    if !VALID_PROCESS_ACTIONS.contains(&action.as_str()) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": format!("invalid action: {action}") }))).into_response();
    }

    let result = match action.as_str() {
        "start" => state.process_manager.start(&name),
        "stop" => state.process_manager.stop(&name, Duration::from_secs(10)).await.map(|_| ()),
        "restart" => state.process_manager.restart(&name).await,
        _ => unreachable!(),
    };

    match result {
        Ok(()) => Json(json!({ "ok": true, "action": action, "process": name })).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn deploy_trigger_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.deployer.notify_change().await;
    Json(state.deployer.status().await)
}

#[derive(Debug, Default, Deserialize)]
struct RestartRequest {
    #[serde(default)]
    force: bool,
}

async fn supervisor_restart_handler(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RestartRequest>>,
) -> impl IntoResponse {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let active = state.session_monitor.active_session_count();
    if active > 0 && !body.force {
        return Json(json!({
            "ok": false,
            "warning": true,
            "message": format!("{active} active agent session(s) running"),
            "active_sessions_count": active,
        }))
        .into_response();
    }

    let remaining = state.restart_state.try_mark_restart();
    if !remaining.is_zero() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "message": "restart cooldown in effect", "cooldown_remaining": remaining.as_secs_f64() })),
        )
            .into_response();
    }

    state.process_manager.stop_all(Duration::from_secs(10)).await;
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::process::exit(42);
    });

    Json(json!({ "ok": true, "message": "supervisor restart initiated" })).into_response()
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_lines")]
    n: usize,
    #[serde(default = "default_log_type")]
    r#type: String,
}

fn default_log_lines() -> usize {
    100
}

fn default_log_type() -> String {
    "out".to_string()
}

async fn logs_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid name" }))).into_response();
    }
    let suffix = if query.r#type == "error" { "error" } else { "out" };
    let log_file = state.log_dir.join(format!("{name}-{suffix}.log"));

    let resolved = log_file.canonicalize().ok();
    let log_dir_resolved = state.log_dir.canonicalize().ok();
    if let (Some(resolved), Some(log_dir_resolved)) = (&resolved, &log_dir_resolved) {
        if !resolved.starts_with(log_dir_resolved) {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid path" }))).into_response();
        }
    }

    let text = match tokio::fs::read_to_string(&log_file).await {
        Ok(text) => text,
        Err(_) => return Json(json!({ "lines": Vec::<String>::new(), "file": log_file.display().to_string() })).into_response(),
    };
    let all_lines: Vec<&str> = text.lines().collect();
    let start = all_lines.len().saturating_sub(query.n);
    Json(json!({ "lines": &all_lines[start..], "file": log_file.display().to_string() })).into_response()
}

/// Slack Events API payload, trimmed to the fields a `message`/`app_mention`
/// event carries. URL verification challenges are handled separately below.
#[derive(Debug, Deserialize)]
struct SlackEventEnvelope {
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event: Option<SlackEvent>,
}

#[derive(Debug, Deserialize)]
struct SlackEvent {
    #[serde(default)]
    r#type: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
}

async fn slack_webhook_handler(State(state): State<Arc<AppState>>, Json(body): Json<SlackEventEnvelope>) -> impl IntoResponse {
    if let Some(challenge) = body.challenge {
        return Json(json!({ "challenge": challenge })).into_response();
    }

    let Some(event) = body.event else {
        return StatusCode::OK.into_response();
    };
    if event.r#type != "message" && event.r#type != "app_mention" {
        return StatusCode::OK.into_response();
    }

    let thread_ts = event.thread_ts.unwrap_or_else(|| event.ts.clone());
    let role = if state.is_admin(&event.user) { Role::Admin } else { Role::Viewer };
    let executor = state.executor.clone();
    let channel = event.channel.clone();
    let user = event.user.clone();
    tokio::spawn(async move {
        executor
            .process_turn(&thread_ts, &channel, &event.text, &event.ts, role, SourceType::Mention, &user, &user)
            .await;
    });

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_restart_state_has_no_cooldown() {
        let state = RestartState::new();
        assert!(state.cooldown_remaining().is_zero());
    }

    #[test]
    fn marking_a_restart_starts_the_cooldown() {
        let state = RestartState::new();
        assert!(state.try_mark_restart().is_zero());
        assert!(!state.cooldown_remaining().is_zero());
        assert!(!state.try_mark_restart().is_zero());
    }
}
