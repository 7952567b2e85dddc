use async_trait::async_trait;

use crate::error::TrackerError;
use crate::types::Card;

#[derive(Debug, Clone)]
pub struct TrackerList {
    pub id: String,
    pub name: String,
}

/// Surface a card-tracking board (Trello or equivalent) must implement.
#[async_trait]
pub trait TrackerAdapter: Send + Sync {
    async fn get_lists(&self) -> Result<Vec<TrackerList>, TrackerError>;
    async fn get_cards_in_list(&self, list_id: &str) -> Result<Vec<Card>, TrackerError>;
    async fn get_card(&self, card_id: &str) -> Result<Card, TrackerError>;
    async fn move_card(&self, card_id: &str, list_id: &str) -> Result<(), TrackerError>;
    async fn update_card_name(&self, card_id: &str, name: &str) -> Result<(), TrackerError>;
    async fn remove_label_from_card(&self, card_id: &str, label_id: &str) -> Result<(), TrackerError>;
}
