use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, instrument};
use warden_core::{Role, SourceType};

use crate::error::{Result, SessionError};
use crate::lock::ThreadLock;
use crate::types::Session;

/// Thread-safe in-memory table of sessions keyed by `thread_ts`, with a
/// periodic flush to a single JSON file for durability across restarts.
///
/// Follows the same shape as a `Mutex`-wrapped connection pool handed out to
/// every caller; here the "connection" is a `DashMap` so
/// reads and writes from different threads don't serialize on each other,
/// which matters because H may be running many threads' turns concurrently.
pub struct SessionManager {
    sessions: DashMap<String, Session>,
    locks: DashMap<String, ThreadLock>,
    snapshot_path: PathBuf,
}

impl SessionManager {
    /// Load any existing snapshot from `snapshot_path` (or start empty).
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        let snapshot_path = snapshot_path.into();
        let loaded: Vec<Session> =
            warden_core::atomic_fs::read_json_or_default(&snapshot_path);
        let sessions = DashMap::new();
        for s in loaded {
            sessions.insert(s.thread_ts.clone(), s);
        }
        Self { sessions, locks: DashMap::new(), snapshot_path }
    }

    /// Return the existing session for `thread_ts`, or create one.
    #[instrument(skip(self, username), fields(thread_ts))]
    pub fn get_or_create(
        &self,
        thread_ts: &str,
        channel_id: &str,
        user_id: &str,
        username: &str,
        role: Role,
        source_type: SourceType,
    ) -> Session {
        if let Some(existing) = self.sessions.get(thread_ts) {
            debug!("session cache hit");
            return existing.clone();
        }
        let session = Session::new(thread_ts, channel_id, user_id, username, role, source_type);
        self.sessions.insert(thread_ts.to_string(), session.clone());
        session
    }

    #[instrument(skip(self))]
    pub fn get(&self, thread_ts: &str) -> Option<Session> {
        self.sessions.get(thread_ts).map(|s| s.clone())
    }

    /// Record the agent-assigned session id (set on first turn, replaced on
    /// post-compact rotation; never cleared once present).
    #[instrument(skip(self))]
    pub fn update_session_id(&self, thread_ts: &str, session_id: &str) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(thread_ts)
            .ok_or_else(|| SessionError::NotFound(thread_ts.to_string()))?;
        entry.session_id = Some(session_id.to_string());
        entry.last_active_at = chrono::Utc::now().to_rfc3339();
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn increment_message_count(&self, thread_ts: &str) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(thread_ts)
            .ok_or_else(|| SessionError::NotFound(thread_ts.to_string()))?;
        entry.message_count += 1;
        entry.last_active_at = chrono::Utc::now().to_rfc3339();
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn mark_session_running(&self, thread_ts: &str) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(thread_ts)
            .ok_or_else(|| SessionError::NotFound(thread_ts.to_string()))?;
        entry.running = true;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn mark_session_stopped(&self, thread_ts: &str) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(thread_ts)
            .ok_or_else(|| SessionError::NotFound(thread_ts.to_string()))?;
        entry.running = false;
        Ok(())
    }

    /// Number of threads with a turn currently in flight — J polls this to
    /// decide whether a pending deploy may proceed.
    pub fn get_running_session_count(&self) -> usize {
        self.sessions.iter().filter(|e| e.running).count()
    }

    /// Fetch (creating if absent) the per-thread re-entrant lock handle.
    /// Acquiring it is the caller's job via `ThreadLock::try_acquire`.
    pub fn get_session_lock(&self, thread_ts: &str) -> ThreadLock {
        self.locks.entry(thread_ts.to_string()).or_default().clone()
    }

    /// Atomically snapshot every session to `snapshot_path`. Intended to be
    /// called from a periodic task in the gateway's main loop.
    #[instrument(skip(self))]
    pub fn flush(&self) -> Result<()> {
        let all: Vec<Session> = self.sessions.iter().map(|e| e.clone()).collect();
        warden_core::atomic_fs::write_json_atomic(&self.snapshot_path, &all)?;
        Ok(())
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path().join("sessions.json"));
        let a = mgr.get_or_create("T1", "C1", "U1", "alice", Role::Viewer, SourceType::Mention);
        let b = mgr.get_or_create("T1", "C1", "U1", "alice", Role::Viewer, SourceType::Mention);
        assert_eq!(a.created_at, b.created_at);
    }

    #[test]
    fn flush_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let mgr = SessionManager::new(&path);
        mgr.get_or_create("T1", "C1", "U1", "alice", Role::Viewer, SourceType::Mention);
        mgr.increment_message_count("T1").unwrap();
        mgr.flush().unwrap();

        let reloaded = SessionManager::new(&path);
        let s = reloaded.get("T1").unwrap();
        assert_eq!(s.message_count, 1);
    }

    #[test]
    fn running_count_reflects_marks() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path().join("sessions.json"));
        mgr.get_or_create("T1", "C1", "U1", "alice", Role::Viewer, SourceType::Mention);
        mgr.get_or_create("T2", "C1", "U2", "bob", Role::Viewer, SourceType::Mention);
        mgr.mark_session_running("T1").unwrap();
        assert_eq!(mgr.get_running_session_count(), 1);
        mgr.mark_session_stopped("T1").unwrap();
        assert_eq!(mgr.get_running_session_count(), 0);
    }

    #[test]
    fn session_lock_is_stable_per_thread() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path().join("sessions.json"));
        let l1 = mgr.get_session_lock("T1");
        let token = crate::lock::LockToken::new();
        let _guard = l1.try_acquire(token).unwrap();
        let l2 = mgr.get_session_lock("T1");
        assert!(l2.is_held());
    }
}
