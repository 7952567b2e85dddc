//! Concrete `TrackerAdapter` backed by the Trello REST API, grounded on
//! the Python original's `py-trello`-based board/card access.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use warden_tracker::{Card, TrackerAdapter, TrackerError, TrackerList};

const TRELLO_API: &str = "https://api.trello.com/1";

pub struct TrelloTrackerAdapter {
    client: reqwest::Client,
    board_id: String,
    key: String,
    token: String,
}

impl TrelloTrackerAdapter {
    pub fn new(board_id: String, key: String, token: String) -> Self {
        Self { client: reqwest::Client::new(), board_id, key, token }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.query(&[("key", self.key.as_str()), ("token", self.token.as_str())])
    }
}

#[derive(Deserialize)]
struct TrelloList {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct TrelloCard {
    id: String,
    name: String,
    #[serde(default)]
    desc: String,
    #[serde(rename = "shortUrl", default)]
    short_url: String,
    #[serde(rename = "idList")]
    id_list: String,
    #[serde(default)]
    labels: Vec<TrelloLabel>,
    #[serde(rename = "dueComplete", default)]
    due_complete: Option<bool>,
}

#[derive(Deserialize)]
struct TrelloLabel {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

impl From<TrelloCard> for Card {
    fn from(c: TrelloCard) -> Self {
        Card {
            id: c.id,
            name: c.name,
            desc: c.desc,
            url: c.short_url,
            list_id: c.id_list,
            labels: c.labels.into_iter().map(|l| if l.name.is_empty() { l.id } else { l.name }).collect(),
            due_complete: c.due_complete,
        }
    }
}

fn adapter_err(context: &str, e: impl std::fmt::Display) -> TrackerError {
    TrackerError::Adapter(format!("{context}: {e}"))
}

#[async_trait]
impl TrackerAdapter for TrelloTrackerAdapter {
    async fn get_lists(&self) -> Result<Vec<TrackerList>, TrackerError> {
        let url = format!("{TRELLO_API}/boards/{}/lists", self.board_id);
        let resp = self.auth(self.client.get(url)).send().await.map_err(|e| adapter_err("get_lists", e))?;
        let lists: Vec<TrelloList> = resp.json().await.map_err(|e| adapter_err("get_lists parse", e))?;
        Ok(lists.into_iter().map(|l| TrackerList { id: l.id, name: l.name }).collect())
    }

    async fn get_cards_in_list(&self, list_id: &str) -> Result<Vec<Card>, TrackerError> {
        let url = format!("{TRELLO_API}/lists/{list_id}/cards");
        let resp = self.auth(self.client.get(url)).send().await.map_err(|e| adapter_err("get_cards_in_list", e))?;
        let cards: Vec<TrelloCard> = resp.json().await.map_err(|e| adapter_err("get_cards_in_list parse", e))?;
        Ok(cards.into_iter().map(Card::from).collect())
    }

    async fn get_card(&self, card_id: &str) -> Result<Card, TrackerError> {
        let url = format!("{TRELLO_API}/cards/{card_id}");
        let resp = self.auth(self.client.get(url)).send().await.map_err(|e| adapter_err("get_card", e))?;
        let card: TrelloCard = resp.json().await.map_err(|e| adapter_err("get_card parse", e))?;
        Ok(card.into())
    }

    async fn move_card(&self, card_id: &str, list_id: &str) -> Result<(), TrackerError> {
        let url = format!("{TRELLO_API}/cards/{card_id}");
        self.auth(self.client.put(url).json(&json!({ "idList": list_id })))
            .send()
            .await
            .map_err(|e| adapter_err("move_card", e))?;
        Ok(())
    }

    async fn update_card_name(&self, card_id: &str, name: &str) -> Result<(), TrackerError> {
        let url = format!("{TRELLO_API}/cards/{card_id}");
        self.auth(self.client.put(url).json(&json!({ "name": name })))
            .send()
            .await
            .map_err(|e| adapter_err("update_card_name", e))?;
        Ok(())
    }

    async fn remove_label_from_card(&self, card_id: &str, label_id: &str) -> Result<(), TrackerError> {
        let url = format!("{TRELLO_API}/cards/{card_id}/idLabels/{label_id}");
        self.auth(self.client.delete(url)).send().await.map_err(|e| adapter_err("remove_label_from_card", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trello_card_prefers_label_name_over_id() {
        let card: Card = TrelloCard {
            id: "c1".into(),
            name: "Fix bug".into(),
            desc: "".into(),
            short_url: "https://trello.com/c/c1".into(),
            id_list: "l1".into(),
            labels: vec![
                TrelloLabel { id: "lab1".into(), name: "bug".into() },
                TrelloLabel { id: "lab2".into(), name: "".into() },
            ],
            due_complete: Some(false),
        }
        .into();
        assert_eq!(card.labels, vec!["bug".to_string(), "lab2".to_string()]);
        assert_eq!(card.url, "https://trello.com/c/c1");
    }

    #[test]
    fn adapter_err_wraps_context_and_cause() {
        let err = adapter_err("get_card", "timed out");
        assert!(matches!(err, TrackerError::Adapter(msg) if msg.contains("get_card") && msg.contains("timed out")));
    }
}
