use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Detects remote-ahead-of-local by `git fetch` + comparing `rev-parse` output
///. Any subprocess
/// or I/O failure is swallowed and reported as "no change" — network hiccups
/// are routine, not an error condition the main loop should surface.
pub struct GitPoller {
    repo_path: PathBuf,
    remote: String,
    branch: String,
    local_head: Option<String>,
    remote_head: Option<String>,
}

impl GitPoller {
    pub fn new(repo_path: PathBuf, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self { repo_path, remote: remote.into(), branch: branch.into(), local_head: None, remote_head: None }
    }

    pub fn local_head(&self) -> Option<&str> {
        self.local_head.as_deref()
    }

    pub fn remote_head(&self) -> Option<&str> {
        self.remote_head.as_deref()
    }

    pub fn reset(&mut self) {
        self.local_head = None;
        self.remote_head = None;
    }

    /// Fetches the remote and compares heads. Returns `true` when local and
    /// remote diverge (a redeploy candidate); `false` on no change OR on any
    /// failure reaching git.
    pub async fn check(&mut self) -> bool {
        if self.fetch().await.is_err() {
            return false;
        }
        let (local, remote) = match (self.rev_parse("HEAD").await, self.rev_parse(&format!("{}/{}", self.remote, self.branch)).await) {
            (Ok(l), Ok(r)) => (l, r),
            _ => return false,
        };
        let changed = local != remote;
        self.local_head = Some(local);
        self.remote_head = Some(remote);
        changed
    }

    async fn fetch(&self) -> std::io::Result<()> {
        let output = self.run(&["fetch", &self.remote, &self.branch]).await?;
        if !output.status.success() {
            warn!(stderr = %String::from_utf8_lossy(&output.stderr), "git fetch failed");
            return Err(std::io::Error::other("git fetch failed"));
        }
        Ok(())
    }

    async fn rev_parse(&self, rev: &str) -> std::io::Result<String> {
        let output = self.run(&["rev-parse", rev]).await?;
        if !output.status.success() {
            return Err(std::io::Error::other("git rev-parse failed"));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run(&self, args: &[&str]) -> std::io::Result<std::process::Output> {
        let fut = tokio::process::Command::new("git").args(args).current_dir(&self.repo_path).output();
        match tokio::time::timeout(GIT_TIMEOUT, fut).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::other("git command timed out")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn check_against_nonexistent_repo_fails_closed() {
        let mut poller = GitPoller::new(PathBuf::from("/nonexistent/warden-test-repo"), "origin", "main");
        assert!(!poller.check().await);
        assert!(poller.local_head().is_none());
    }

    #[test]
    fn reset_clears_heads() {
        let mut poller = GitPoller::new(PathBuf::from("."), "origin", "main");
        poller.local_head = Some("abc".to_string());
        poller.remote_head = Some("def".to_string());
        poller.reset();
        assert!(poller.local_head().is_none());
        assert!(poller.remote_head().is_none());
    }
}
