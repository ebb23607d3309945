// src/transport/telegram.rs
// Telegram bot transport: getUpdates long-polling in, sendMessage out.
// Approval button presses arrive as callback_query updates and are mapped
// onto the approval callback channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ApprovalReply, InboundMessage, OutboundMessage, Transport};

/// Long-poll window passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 50;

/// Pause before re-polling after an API error.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram message length limit; longer responses are split.
const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    chat: TgChat,
    #[serde(default)]
    from: Option<TgUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    photo: Option<Vec<TgPhotoSize>>,
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgPhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    #[serde(default)]
    from: Option<TgUser>,
    #[serde(default)]
    message: Option<TgMessage>,
    #[serde(default)]
    data: Option<String>,
}

pub struct TelegramTransport {
    token: String,
    http: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(token: String) -> Self {
        let http = reqwest::Client::builder()
            // Must exceed the long-poll window
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { token, http }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.token, method)
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let response: UpdatesResponse = self
            .http
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                (
                    "allowed_updates",
                    r#"["message","callback_query"]"#.to_string(),
                ),
            ])
            .send()
            .await
            .context("getUpdates request failed")?
            .json()
            .await
            .context("getUpdates returned invalid JSON")?;

        if !response.ok {
            anyhow::bail!("getUpdates returned ok=false");
        }
        Ok(response.result)
    }

    async fn send_text(&self, chat_id: i64, text: &str) {
        for piece in split_message(text, MAX_MESSAGE_LEN) {
            let result = self
                .http
                .post(self.api_url("sendMessage"))
                .json(&json!({ "chat_id": chat_id, "text": piece }))
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    warn!(chat_id, status = %response.status(), "sendMessage rejected");
                }
                Err(e) => warn!(chat_id, "sendMessage failed: {}", e),
                _ => {}
            }
        }
    }

    /// Acknowledge a callback so the client stops its spinner.
    async fn answer_callback(&self, callback_id: &str) {
        let _ = self
            .http
            .post(self.api_url("answerCallbackQuery"))
            .json(&json!({ "callback_query_id": callback_id }))
            .send()
            .await;
    }

    fn convert(&self, update: Update) -> Option<InboundMessage> {
        if let Some(callback) = update.callback_query {
            let approval = callback.data.as_deref().and_then(parse_approval_data);
            let chat_id = callback.message.as_ref().map(|m| m.chat.id)?;
            return Some(InboundMessage {
                chat_id,
                user_id: callback.from.map(|u| u.id),
                text: String::new(),
                media: Vec::new(),
                approval,
            });
        }

        let message = update.message?;
        let text = message
            .text
            .or(message.caption)
            .unwrap_or_default();
        let media = message
            .photo
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.file_id)
            .collect::<Vec<_>>();
        if text.is_empty() && media.is_empty() {
            return None;
        }
        Some(InboundMessage {
            chat_id: message.chat.id,
            user_id: message.from.map(|u| u.id),
            text,
            media,
            approval: None,
        })
    }
}

/// `approve:<id>` / `deny:<id>` callback payloads.
fn parse_approval_data(data: &str) -> Option<ApprovalReply> {
    let (verdict, id) = data.split_once(':')?;
    let approved = match verdict {
        "approve" => true,
        "deny" => false,
        _ => return None,
    };
    Some(ApprovalReply {
        approval_id: id.to_string(),
        approved,
    })
}

/// Split on char boundaries into pieces of at most `limit` chars.
fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|c| c.iter().collect())
        .collect()
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn start(
        self: Arc<Self>,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    ) -> Result<()> {
        // Sender half: drain the notify channel.
        let sender = self.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                sender.send_text(message.chat_id, &message.text).await;
            }
            debug!("Telegram outbound channel closed");
        });

        // Poll half: long-poll getUpdates forever.
        let mut offset = 0i64;
        loop {
            match self.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(callback) = update.callback_query.as_ref() {
                            self.answer_callback(&callback.id).await;
                        }
                        if let Some(message) = self.convert(update) {
                            if inbound.send(message).is_err() {
                                // Daemon gone; stop polling.
                                return Ok(());
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Telegram poll failed: {}", e);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_approval_data() {
        let approve = parse_approval_data("approve:abc-123").unwrap();
        assert!(approve.approved);
        assert_eq!(approve.approval_id, "abc-123");

        let deny = parse_approval_data("deny:abc-123").unwrap();
        assert!(!deny.approved);

        assert!(parse_approval_data("snooze:abc").is_none());
        assert!(parse_approval_data("garbage").is_none());
    }

    #[test]
    fn test_split_message() {
        assert_eq!(split_message("short", 10), vec!["short"]);

        let long = "x".repeat(9001);
        let pieces = split_message(&long, 4096);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].len(), 4096);
        assert_eq!(pieces[2].len(), 9001 - 2 * 4096);
    }

    #[test]
    fn test_convert_text_message() {
        let transport = TelegramTransport::new("token".into());
        let update: Update = serde_json::from_str(
            r#"{"update_id": 1, "message": {"chat": {"id": 42}, "from": {"id": 7}, "text": "hello"}}"#,
        )
        .unwrap();
        let inbound = transport.convert(update).unwrap();
        assert_eq!(inbound.chat_id, 42);
        assert_eq!(inbound.user_id, Some(7));
        assert_eq!(inbound.text, "hello");
        assert!(inbound.approval.is_none());
    }

    #[test]
    fn test_convert_photo_with_caption() {
        let transport = TelegramTransport::new("token".into());
        let update: Update = serde_json::from_str(
            r#"{"update_id": 1, "message": {"chat": {"id": 42},
                "photo": [{"file_id": "f1"}, {"file_id": "f2"}],
                "caption": "look at this"}}"#,
        )
        .unwrap();
        let inbound = transport.convert(update).unwrap();
        assert_eq!(inbound.text, "look at this");
        assert_eq!(inbound.media, vec!["f1", "f2"]);
    }

    #[test]
    fn test_convert_callback_query_to_approval() {
        let transport = TelegramTransport::new("token".into());
        let update: Update = serde_json::from_str(
            r#"{"update_id": 1, "callback_query": {"id": "cb1", "from": {"id": 7},
                "message": {"chat": {"id": 42}}, "data": "approve:nonce-1"}}"#,
        )
        .unwrap();
        let inbound = transport.convert(update).unwrap();
        let approval = inbound.approval.unwrap();
        assert!(approval.approved);
        assert_eq!(approval.approval_id, "nonce-1");
    }

    #[test]
    fn test_convert_empty_message_dropped() {
        let transport = TelegramTransport::new("token".into());
        let update: Update = serde_json::from_str(
            r#"{"update_id": 1, "message": {"chat": {"id": 42}}}"#,
        )
        .unwrap();
        assert!(transport.convert(update).is_none());
    }
}
