//! Concrete `ChatAdapter` backed by the Slack Web API, grounded on the
//! teacher's `reqwest`-client pattern (`update.rs`) and on the Python
//! original's use of `slack_bolt`'s `say`/`reactions_add` calls.

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;
use warden_channels::{ChannelError, ChatAdapter};

const SLACK_API: &str = "https://slack.com/api";

pub struct SlackChatAdapter {
    client: reqwest::Client,
    bot_token: String,
}

impl SlackChatAdapter {
    pub fn new(bot_token: String) -> Self {
        Self { client: reqwest::Client::new(), bot_token }
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value, ChannelError> {
        let resp = self
            .client
            .post(format!("{SLACK_API}/{method}"))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let value: serde_json::Value = resp.json().await.map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        check_envelope(value)
    }
}

/// Slack always answers with HTTP 200; failures show up in the
/// `{"ok": false, "error": "..."}` body instead.
fn check_envelope(value: serde_json::Value) -> Result<serde_json::Value, ChannelError> {
    if value["ok"].as_bool() != Some(true) {
        let err = value["error"].as_str().unwrap_or("unknown").to_string();
        if err == "invalid_auth" || err == "not_authed" {
            return Err(ChannelError::AuthFailed(err));
        }
        return Err(ChannelError::SendFailed(err));
    }
    Ok(value)
}

#[async_trait]
impl ChatAdapter for SlackChatAdapter {
    async fn post_message(&self, channel: &str, text: &str, thread_ts: Option<&str>) -> Result<String, ChannelError> {
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = json!(ts);
        }
        let resp = self.call("chat.postMessage", body).await?;
        Ok(resp["ts"].as_str().unwrap_or_default().to_string())
    }

    async fn update_message(&self, channel: &str, ts: &str, text: &str) -> Result<(), ChannelError> {
        self.call("chat.update", json!({ "channel": channel, "ts": ts, "text": text })).await?;
        Ok(())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ChannelError> {
        match self.call("reactions.add", json!({ "channel": channel, "timestamp": ts, "name": name })).await {
            Ok(_) => Ok(()),
            Err(ChannelError::SendFailed(ref e)) if e == "already_reacted" => Ok(()),
            Err(e) => {
                warn!(channel, ts, name, error = %e, "failed to add reaction");
                Err(e)
            }
        }
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ChannelError> {
        match self.call("reactions.remove", json!({ "channel": channel, "timestamp": ts, "name": name })).await {
            Ok(_) => Ok(()),
            Err(ChannelError::SendFailed(ref e)) if e == "no_reaction" => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn open_dm(&self, user: &str) -> Result<String, ChannelError> {
        let resp = self.call("conversations.open", json!({ "users": user })).await?;
        Ok(resp["channel"]["id"].as_str().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_adapter_stores_bot_token() {
        let adapter = SlackChatAdapter::new("xoxb-test".to_string());
        assert_eq!(adapter.bot_token, "xoxb-test");
    }

    #[test]
    fn envelope_ok_true_passes_through() {
        let value = json!({ "ok": true, "ts": "123.456" });
        assert!(check_envelope(value).is_ok());
    }

    #[test]
    fn envelope_invalid_auth_maps_to_auth_failed() {
        let value = json!({ "ok": false, "error": "invalid_auth" });
        assert!(matches!(check_envelope(value), Err(ChannelError::AuthFailed(_))));
    }

    #[test]
    fn envelope_other_error_maps_to_send_failed() {
        let value = json!({ "ok": false, "error": "channel_not_found" });
        assert!(matches!(check_envelope(value), Err(ChannelError::SendFailed(ref e)) if e == "channel_not_found"));
    }
}
