//! Per-thread re-entrant lock.
//!
//! H acquires one of these before running a turn and holds it for the whole
//! turn's chain, including any nested re-entry triggered by D's compact
//! retry (same chain, same token). A plain `tokio::sync::Mutex` isn't
//! re-entrant, so this tracks the current holder by token instead of by
//! task: a second `try_acquire` with the *same* token nests; any other
//! token is refused rather than blocking, since callers need to know
//! immediately whether the thread is busy (intervention replacement path).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying one turn's chain of re-entrant acquisitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockToken(u64);

impl LockToken {
    pub fn new() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct State {
    holder: Option<LockToken>,
    depth: u32,
}

#[derive(Clone)]
pub struct ThreadLock {
    state: Arc<Mutex<State>>,
}

impl Default for ThreadLock {
    fn default() -> Self {
        Self { state: Arc::new(Mutex::new(State::default())) }
    }
}

impl ThreadLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking: succeeds immediately if unheld, or if already held by
    /// `token` (re-entrant nesting). Fails if held by a different token.
    pub fn try_acquire(&self, token: LockToken) -> Option<LockGuard> {
        let mut s = self.state.lock().unwrap();
        match s.holder {
            None => {
                s.holder = Some(token);
                s.depth = 1;
                Some(LockGuard { state: self.state.clone(), token })
            }
            Some(h) if h == token => {
                s.depth += 1;
                Some(LockGuard { state: self.state.clone(), token })
            }
            Some(_) => None,
        }
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().unwrap().holder.is_some()
    }
}

pub struct LockGuard {
    state: Arc<Mutex<State>>,
    token: LockToken,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut s = self.state.lock().unwrap();
        if s.holder == Some(self.token) {
            s.depth -= 1;
            if s.depth == 0 {
                s.holder = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_token_re_enters() {
        let lock = ThreadLock::new();
        let token = LockToken::new();
        let outer = lock.try_acquire(token).unwrap();
        let inner = lock.try_acquire(token).unwrap();
        drop(inner);
        assert!(lock.is_held());
        drop(outer);
        assert!(!lock.is_held());
    }

    #[test]
    fn different_token_is_refused_while_held() {
        let lock = ThreadLock::new();
        let a = LockToken::new();
        let b = LockToken::new();
        let _guard = lock.try_acquire(a).unwrap();
        assert!(lock.try_acquire(b).is_none());
    }

    #[test]
    fn releases_fully_after_drop() {
        let lock = ThreadLock::new();
        let token = LockToken::new();
        {
            let _guard = lock.try_acquire(token).unwrap();
        }
        assert!(!lock.is_held());
        assert!(lock.try_acquire(LockToken::new()).is_some());
    }
}
