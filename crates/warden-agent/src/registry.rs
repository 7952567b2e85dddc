//! Module-scoped `RunnerRegistry`: the process-wide table of live agent subprocesses, owned by H and
//! passed by reference rather than kept as free-floating module statics.
//! Mutation goes through a single `DashMap` entry lock per thread, never a
//! registry-wide mutex, so one thread's interrupt never blocks another's.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, warn};

pub struct RunnerHandle {
    pub pid: Option<u32>,
    pub interrupt: Arc<Notify>,
}

#[derive(Default)]
pub struct RunnerRegistry {
    instances: DashMap<String, RunnerHandle>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, thread_ts: &str, pid: Option<u32>) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.instances.insert(thread_ts.to_string(), RunnerHandle { pid, interrupt: notify.clone() });
        notify
    }

    pub fn unregister(&self, thread_ts: &str) {
        self.instances.remove(thread_ts);
    }

    /// Fire-and-forget: no-op if no invocation is active for this thread.
    pub fn interrupt(&self, thread_ts: &str) {
        if let Some(handle) = self.instances.get(thread_ts) {
            debug!(thread_ts, "signaling interrupt");
            handle.interrupt.notify_one();
        }
    }

    /// Disconnect every live instance; force-kill any that don't respond.
    pub async fn shutdown_all(&self) {
        let entries: Vec<(String, Option<u32>, Arc<Notify>)> = self
            .instances
            .iter()
            .map(|e| (e.key().clone(), e.value().pid, e.value().interrupt.clone()))
            .collect();

        for (thread_ts, pid, notify) in entries {
            notify.notify_one();
            tokio::time::sleep(Duration::from_secs(3)).await;
            if let Some(pid) = pid {
                if process_alive(pid) {
                    warn!(thread_ts, pid, "runner did not disconnect gracefully, sending SIGTERM");
                    send_signal(pid, libc::SIGTERM);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    if process_alive(pid) {
                        warn!(thread_ts, pid, "runner still alive after SIGTERM, sending SIGKILL");
                        send_signal(pid, libc::SIGKILL);
                    }
                }
            }
            self.instances.remove(&thread_ts);
        }
    }
}

fn send_signal(pid: u32, sig: i32) {
    unsafe {
        libc::kill(pid as i32, sig);
    }
}

fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}
