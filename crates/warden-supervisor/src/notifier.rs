use std::time::Duration;

use serde_json::json;
use tracing::warn;

const MAX_COMMITS_DISPLAY: usize = 10;
const USER_AGENT: &str = "warden-supervisor";

/// Posts Slack-webhook-style deploy notifications, using the same `reqwest` client-building
/// pattern the gateway's own update checker uses.
pub struct Notifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { webhook_url, client }
    }

    pub async fn notify_change_detected(&self, commits: &[String]) {
        let mut lines = vec![":mag: *changes detected upstream*".to_string()];
        lines.extend(format_commit_section(commits));
        self.send(&lines.join("\n")).await;
    }

    pub async fn notify_deploy_start(&self, commits: &[String]) {
        let mut lines = vec![":arrows_counterclockwise: *deploying...*".to_string()];
        lines.extend(format_commit_section(commits));
        self.send(&lines.join("\n")).await;
    }

    pub async fn notify_deploy_success(&self) {
        self.send(":white_check_mark: *deploy complete*").await;
    }

    pub async fn notify_deploy_failure(&self, error: &str) {
        self.send(&format!(":x: *deploy failed*\n```{error}```")).await;
    }

    pub async fn notify_waiting_sessions(&self) {
        self.send(":hourglass_flowing_sand: *waiting for sessions to finish before deploying...*").await;
    }

    async fn send(&self, message: &str) {
        let Some(url) = &self.webhook_url else { return };
        let body = json!({ "text": message });
        if let Err(e) = self.client.post(url).json(&body).send().await {
            warn!(error = %e, "failed to deliver webhook notification");
        }
    }
}

fn format_commit_section(commits: &[String]) -> Vec<String> {
    if commits.is_empty() {
        return Vec::new();
    }
    let mut lines = Vec::new();
    for entry in commits.iter().take(MAX_COMMITS_DISPLAY) {
        lines.push(format!("`{entry}`"));
    }
    let overflow = commits.len().saturating_sub(MAX_COMMITS_DISPLAY);
    if overflow > 0 {
        lines.push(format!("... and {overflow} more"));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_commit_section_truncates_to_ten() {
        let commits: Vec<String> = (0..15).map(|i| format!("commit {i}")).collect();
        let lines = format_commit_section(&commits);
        assert_eq!(lines.len(), 11);
        assert!(lines.last().unwrap().contains("5 more"));
    }

    #[test]
    fn format_commit_section_empty_is_empty() {
        assert!(format_commit_section(&[]).is_empty());
    }

    #[tokio::test]
    async fn notifier_without_webhook_url_is_a_noop() {
        let notifier = Notifier::new(None);
        notifier.notify_deploy_success().await;
    }
}
