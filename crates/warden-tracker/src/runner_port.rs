//! The watcher needs to hand a new-card or list-run turn off to H, but H in
//! turn needs I to resolve `<!-- LIST_RUN: X -->` list names — a direct
//! crate dependency either way would cycle. `TurnRunner` is the seam: I
//! depends on this trait only, and the gateway wires in the real
//! `SessionExecutor` (from `warden-executor`) as the implementation at
//! startup.

use async_trait::async_trait;
use warden_core::Role;

#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub success: bool,
    pub output: String,
    pub session_id: Option<String>,
}

#[async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run_turn(&self, thread_ts: &str, channel_id: &str, prompt: &str, role: Role, session_id: Option<String>) -> TurnOutcome;
}
