//! Card-tracking watcher and list-run orchestration.

pub mod adapter;
pub mod error;
pub mod list_runner;
pub mod runner_port;
pub mod store;
pub mod types;
pub mod watcher;

pub use adapter::{TrackerAdapter, TrackerList};
pub use error::{Result, TrackerError};
pub use list_runner::ListRunner;
pub use runner_port::{TurnOutcome, TurnRunner};
pub use store::TrackerStore;
pub use types::{Card, CardOutcome, ListRunSession, ListRunStatus, ThreadCardInfo, TrackedCard};
pub use watcher::{TrackerWatcher, WatcherConfig};
