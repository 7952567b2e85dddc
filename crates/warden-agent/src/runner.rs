use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::{AgentError, Result};
use crate::registry::RunnerRegistry;
use crate::types::{AgentMessage, CompactEvent, ContentBlock, RunOptions, RunResult, Usage};

const MAX_COMPACT_RETRIES: u32 = 3;
const COMPACT_RETRY_READ_TIMEOUT: Duration = Duration::from_secs(30);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);
const PROGRESS_TAIL_CHARS: usize = 1000;

/// One logical agent invocation, backed by a `claude` CLI subprocess talking
/// typed JSONL over stdin/stdout. Follows the same subprocess-wiring shape
/// (temp system-prompt file, MCP bridge config, stderr redirection) as a
/// one-shot CLI provider, but drives a long-lived streaming loop instead of
/// one-shot `-p --output-format json` calls.
pub struct AgentRunner {
    command: String,
    mcp_bridge_path: Option<String>,
    allowed_tools: Vec<String>,
    log_dir: PathBuf,
    registry: Arc<RunnerRegistry>,
}

impl AgentRunner {
    pub fn new(command: impl Into<String>, log_dir: impl Into<PathBuf>, registry: Arc<RunnerRegistry>) -> Self {
        Self {
            command: command.into(),
            mcp_bridge_path: None,
            allowed_tools: Vec::new(),
            log_dir: log_dir.into(),
            registry,
        }
    }

    pub fn with_mcp_bridge(mut self, path: Option<String>) -> Self {
        self.mcp_bridge_path = path;
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn interrupt(&self, thread_ts: &str) {
        self.registry.interrupt(thread_ts);
    }

    pub async fn shutdown_all(&self) {
        self.registry.shutdown_all().await;
    }

    /// Ask the subprocess to produce a compacted replacement session.
    /// Returns the new `session_id` if the subprocess assigned one.
    #[instrument(skip(self))]
    pub async fn compact_session(&self, session_id: &str) -> Result<Option<String>> {
        let opts = RunOptions {
            prompt: "/compact".to_string(),
            session_id: Some(session_id.to_string()),
            user_id: None,
            thread_ts: format!("compact-{session_id}"),
            channel: String::new(),
        };
        let result = self
            .run(opts, |_| async {}, |_, _| async {}, |_| async {})
            .await?;
        Ok(result.session_id.filter(|id| id != session_id))
    }

    #[instrument(skip(self, prompt, on_progress, on_compact, on_rate_limit_warning), fields(thread_ts = %opts.thread_ts))]
    pub async fn run<P, PF, C, CF, W, WF>(&self, opts: RunOptions, on_progress: P, on_compact: C, on_rate_limit_warning: W) -> Result<RunResult>
    where
        P: Fn(String) -> PF,
        PF: std::future::Future<Output = ()>,
        C: Fn(String, String) -> CF,
        CF: std::future::Future<Output = ()>,
        W: Fn(String) -> WF,
        WF: std::future::Future<Output = ()>,
    {
        let RunOptions { prompt: base_prompt, session_id, user_id: _, thread_ts, channel: _ } = opts;

        std::fs::create_dir_all(&self.log_dir)?;
        let stderr_log = self.log_dir.join(format!("cli_stderr_{}.log", sanitize(&thread_ts)));
        let stderr_file = std::fs::File::create(&stderr_log)?;

        let sys_file = tempfile::Builder::new().prefix("warden-sys-").suffix(".txt").tempfile()?;

        let mut compact_events: Vec<CompactEvent> = Vec::new();
        let mut result = RunResult::default();
        let mut prompt = base_prompt;
        let mut attempt = 0u32;

        loop {
            let mut cmd = Command::new(&self.command);
            cmd.arg("-p")
                .arg("--output-format")
                .arg("stream-json")
                .arg("--system-prompt-file")
                .arg(sys_file.path())
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(stderr_file.try_clone()?);

            if let Some(ref sid) = session_id {
                cmd.arg("--session-id").arg(sid);
            }
            if !self.allowed_tools.is_empty() {
                if self.allowed_tools.len() == 1 && self.allowed_tools[0] == "*" {
                    cmd.arg("--dangerously-skip-permissions");
                } else {
                    for tool in &self.allowed_tools {
                        cmd.arg("--allowedTools").arg(tool);
                    }
                }
            }
            let _mcp_file = self.write_mcp_config(&mut cmd);

            let mut child = cmd.spawn().map_err(|e| AgentError::Spawn(e.to_string()))?;
            let pid = child.id();
            let notify = self.registry.register(&thread_ts, pid);

            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await?;
            }

            let stdout = child.stdout.take().expect("piped stdout");
            let mut lines = BufReader::new(stdout).lines();
            let mut last_progress = tokio::time::Instant::now();

            loop {
                tokio::select! {
                    _ = notify.notified() => {
                        result.interrupted = true;
                        let _ = child.start_kill();
                        break;
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(raw)) => {
                                if raw.trim().is_empty() {
                                    continue;
                                }
                                match serde_json::from_str::<AgentMessage>(&raw) {
                                    Ok(msg) => {
                                        if self
                                            .apply_message(msg, &mut result, &mut compact_events, &on_progress, &on_rate_limit_warning, &mut last_progress)
                                            .await?
                                        {
                                            break;
                                        }
                                    }
                                    Err(e) => warn!(thread_ts = %thread_ts, error = %e, "unparseable agent message line"),
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!(thread_ts = %thread_ts, error = %e, "error reading agent stdout");
                                break;
                            }
                        }
                    }
                }
            }

            let _ = child.wait().await;
            self.registry.unregister(&thread_ts);

            if result.interrupted || result.success || !result.output.is_empty() {
                break;
            }

            if compact_events.is_empty() || attempt >= MAX_COMPACT_RETRIES {
                break;
            }
            let event = compact_events.remove(0);
            on_compact(event.trigger.clone(), event.note.clone()).await;
            attempt += 1;
            prompt = String::new();
            debug!(attempt, "retrying after pre-compact event");
            tokio::time::sleep(compact_retry_wait()).await;
        }

        if !result.success && !result.interrupted {
            if let Some(last) = result.collected_messages.iter().rev().find(|m| !m.starts_with('[')) {
                result.output = last.clone();
                result.success = true;
            }
        }

        Ok(result)
    }

    async fn apply_message<P, PF, W, WF>(
        &self,
        msg: AgentMessage,
        result: &mut RunResult,
        compact_events: &mut Vec<CompactEvent>,
        on_progress: &P,
        on_rate_limit_warning: &W,
        last_progress: &mut tokio::time::Instant,
    ) -> Result<bool>
    where
        P: Fn(String) -> PF,
        PF: std::future::Future<Output = ()>,
        W: Fn(String) -> WF,
        WF: std::future::Future<Output = ()>,
    {
        match msg {
            AgentMessage::System { session_id } => {
                result.session_id = Some(session_id);
                Ok(false)
            }
            AgentMessage::Assistant { blocks } => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => {
                            result.collected_messages.push(text.clone());
                            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                                let tail: String = text.chars().rev().take(PROGRESS_TAIL_CHARS).collect::<Vec<_>>().into_iter().rev().collect();
                                on_progress(tail).await;
                                *last_progress = tokio::time::Instant::now();
                            }
                        }
                        ContentBlock::ToolUse { name, input, .. } => {
                            result.collected_messages.push(format!("[tool_use: {name}] {input}"));
                        }
                        ContentBlock::ToolResult { content } => {
                            let truncated: String = content.chars().take(PROGRESS_TAIL_CHARS).collect();
                            result.collected_messages.push(format!("[tool_result] {truncated}"));
                        }
                    }
                }
                Ok(false)
            }
            AgentMessage::Result { text, is_error, usage } => {
                result.output = text;
                result.success = !is_error;
                result.usage = usage.or(Some(Usage::default()));
                Ok(true)
            }
            AgentMessage::RateLimit { status, message } => match status.as_str() {
                "allowed" => Ok(false),
                "allowed_warning" => {
                    // Surfaced to the chat debug channel right away — unlike
                    // the pre-compact hook (`on_compact`), this must reach
                    // the user whether or not the turn goes on to succeed.
                    on_rate_limit_warning(message.clone()).await;
                    compact_events.push(CompactEvent { trigger: "rate_limit_warning".into(), note: message });
                    Ok(false)
                }
                _ => {
                    result.error = Some("usage limit reached".to_string());
                    result.success = false;
                    Ok(true)
                }
            },
        }
    }

    fn write_mcp_config(&self, cmd: &mut Command) -> Option<tempfile::NamedTempFile> {
        let binary = self.mcp_bridge_path.clone()?;
        let config = serde_json::json!({
            "mcpServers": { "warden": { "type": "stdio", "command": binary, "args": ["mcp-bridge"] } }
        });
        let file = tempfile::Builder::new().prefix("warden-mcp-").suffix(".json").tempfile().ok()?;
        std::fs::write(file.path(), serde_json::to_string(&config).ok()?).ok()?;
        cmd.arg("--mcp-config").arg(file.path());
        Some(file)
    }
}

#[cfg(not(test))]
fn compact_retry_wait() -> Duration {
    COMPACT_RETRY_READ_TIMEOUT
}

#[cfg(test)]
fn compact_retry_wait() -> Duration {
    Duration::from_millis(1)
}

fn sanitize(raw: &str) -> String {
    raw.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[test]
    fn sanitize_strips_unsafe_path_chars() {
        assert_eq!(sanitize("1690000000.001200"), "1690000000_001200");
        assert_eq!(sanitize("../../etc"), "____etc");
    }

    #[tokio::test]
    async fn rate_limit_warning_is_surfaced_unconditionally_and_still_queues_a_compact_event() {
        let dir = tempfile::tempdir().unwrap();
        let runner = AgentRunner::new("claude", dir.path(), Arc::new(RunnerRegistry::new()));

        let warnings: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let warnings_clone = warnings.clone();
        let on_rate_limit_warning = move |note: String| {
            let warnings = warnings_clone.clone();
            async move {
                warnings.lock().unwrap().push(note);
            }
        };

        let mut result = RunResult::default();
        let mut compact_events = Vec::new();
        let mut last_progress = tokio::time::Instant::now();
        let msg = AgentMessage::RateLimit { status: "allowed_warning".to_string(), message: "80% of quota used".to_string() };

        let keep_going = runner
            .apply_message(msg, &mut result, &mut compact_events, &|_| async {}, &on_rate_limit_warning, &mut last_progress)
            .await
            .unwrap();

        assert!(!keep_going);
        assert_eq!(*warnings.lock().unwrap(), vec!["80% of quota used".to_string()]);
        assert_eq!(compact_events.len(), 1);
        assert_eq!(compact_events[0].trigger, "rate_limit_warning");
    }
}
