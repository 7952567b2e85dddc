//! `tracker/{tracked_cards.json, thread_cards.json, list_run_sessions.json}`
//! under the same root MemoryStore owns.
//! Grounded on `warden_memory::store::MemoryStore`'s atomic-write pattern —
//! kept as a sibling store here rather than folded into `MemoryStore` itself
//! since these tables are keyed and mutated by I, not by B's callers.

use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::instrument;
use warden_core::atomic_fs::{read_json_or_default, write_json_atomic};

use crate::error::Result;
use crate::types::{ListRunSession, ThreadCardInfo, TrackedCard};

pub struct TrackerStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl TrackerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), write_lock: Mutex::new(()) }
    }

    fn tracked_cards_path(&self) -> PathBuf {
        self.root.join("tracker").join("tracked_cards.json")
    }
    fn thread_cards_path(&self) -> PathBuf {
        self.root.join("tracker").join("thread_cards.json")
    }
    fn list_run_sessions_path(&self) -> PathBuf {
        self.root.join("tracker").join("list_run_sessions.json")
    }

    #[instrument(skip(self))]
    pub async fn load_tracked_cards(&self) -> Result<Vec<TrackedCard>> {
        Ok(read_json_or_default(&self.tracked_cards_path()))
    }

    /// Insert or replace by `card_id` — at most one `TrackedCard` per card.
    #[instrument(skip(self, card))]
    pub async fn upsert_tracked_card(&self, card: TrackedCard) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut cards = self.load_tracked_cards().await?;
        cards.retain(|c| c.card_id != card.card_id);
        cards.push(card);
        write_json_atomic(&self.tracked_cards_path(), &cards)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_tracked_card(&self, card_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut cards = self.load_tracked_cards().await?;
        cards.retain(|c| c.card_id != card_id);
        write_json_atomic(&self.tracked_cards_path(), &cards)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn load_thread_cards(&self) -> Result<Vec<ThreadCardInfo>> {
        Ok(read_json_or_default(&self.thread_cards_path()))
    }

    #[instrument(skip(self, info))]
    pub async fn upsert_thread_card(&self, info: ThreadCardInfo) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.load_thread_cards().await?;
        all.retain(|c| c.thread_ts != info.thread_ts);
        all.push(info);
        write_json_atomic(&self.thread_cards_path(), &all)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn load_list_run_sessions(&self) -> Result<Vec<ListRunSession>> {
        Ok(read_json_or_default(&self.list_run_sessions_path()))
    }

    #[instrument(skip(self, session))]
    pub async fn save_list_run_session(&self, session: ListRunSession) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.load_list_run_sessions().await?;
        all.retain(|s| s.session_id != session.session_id);
        all.push(session);
        write_json_atomic(&self.list_run_sessions_path(), &all)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, TrackerStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackerStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn tracked_card_upsert_replaces_by_id() {
        let (_dir, store) = store();
        let card = |name: &str| TrackedCard {
            card_id: "c1".into(),
            card_name: name.into(),
            card_url: "https://x".into(),
            list_id: "l1".into(),
            list_key: "to_go".into(),
            thread_ts: "t1".into(),
            channel_id: "ch1".into(),
            detected_at: chrono::Utc::now().to_rfc3339(),
            session_id: None,
            has_execute: false,
            dm_thread_ts: None,
        };
        store.upsert_tracked_card(card("first")).await.unwrap();
        store.upsert_tracked_card(card("second")).await.unwrap();
        let all = store.load_tracked_cards().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].card_name, "second");
    }

    #[tokio::test]
    async fn list_run_session_round_trips() {
        let (_dir, store) = store();
        let session = ListRunSession::new("S1", "L1", "To Go", vec!["c1".into()]);
        store.save_list_run_session(session).await.unwrap();
        let all = store.load_list_run_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].session_id, "S1");
    }
}
