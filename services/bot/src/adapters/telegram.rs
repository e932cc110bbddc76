//! services/bot/src/adapters/telegram.rs
//!
//! The Telegram Bot API adapter, the concrete implementation of the
//! `MessagingService` port. Every call is a JSON `POST` to `{api}/bot{token}/{method}`.

use std::time::Duration;

use async_trait::async_trait;
use review_bot_core::{InlineButton, Keyboard, MessagingService, PhotoRef, PortError, PortResult, ReplyButton};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Telegram refuses albums with more items than this.
pub const MAX_ALBUM_ITEMS: usize = 10;

const PARSE_MODE: &str = "HTML";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// One entry of the command menu shown by the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandInfo {
    pub command: String,
    pub description: String,
}

#[derive(Clone)]
pub struct TelegramAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramAdapter {
    pub fn new(api_url: &str, token: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> PortResult<T> {
        debug!("Telegram call {}", method);
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await.map_err(|e| {
            PortError::Unexpected(format!("{} returned an unreadable body ({}): {}", method, status, e))
        })?;

        match (envelope.ok, envelope.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(PortError::Unexpected(format!(
                "{} rejected ({}): {}",
                method,
                status,
                envelope.description.unwrap_or_default()
            ))),
        }
    }

    /// Publishes the command menu, optionally for one client language only.
    pub async fn set_my_commands(
        &self,
        commands: &[CommandInfo],
        language_code: Option<&str>,
    ) -> PortResult<()> {
        let mut body = json!({ "commands": commands });
        if let Some(code) = language_code {
            body["language_code"] = json!(code);
        }
        self.call::<bool>("setMyCommands", &body).await.map(|_| ())
    }

    /// Points update delivery at `url`. Telegram echoes `secret` back in the
    /// `X-Telegram-Bot-Api-Secret-Token` header of every delivery.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> PortResult<()> {
        let mut body = json!({
            "url": url,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(secret) = secret {
            body["secret_token"] = json!(secret);
        }
        self.call::<bool>("setWebhook", &body).await.map(|_| ())
    }
}

#[async_trait]
impl MessagingService for TelegramAdapter {
    async fn send_text(&self, chat_id: i64, text: &str, markup: Option<&Keyboard>) -> PortResult<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": PARSE_MODE,
        });
        if let Some(markup) = markup {
            body["reply_markup"] = markup_json(markup);
        }
        self.call::<Value>("sendMessage", &body).await.map(|_| ())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &PhotoRef,
        caption: Option<&str>,
        markup: Option<&Keyboard>,
    ) -> PortResult<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "photo": photo.file_id(),
        });
        if let Some(caption) = caption {
            body["caption"] = json!(caption);
            body["parse_mode"] = json!(PARSE_MODE);
        }
        if let Some(markup) = markup {
            body["reply_markup"] = markup_json(markup);
        }
        self.call::<Value>("sendPhoto", &body).await.map(|_| ())
    }

    async fn send_photo_gallery(
        &self,
        chat_id: i64,
        photos: &[PhotoRef],
        first_caption: Option<&str>,
    ) -> PortResult<()> {
        for (index, chunk) in photos.chunks(MAX_ALBUM_ITEMS).enumerate() {
            let caption = if index == 0 { first_caption } else { None };
            // An album needs at least two items.
            if let [single] = chunk {
                self.send_photo(chat_id, single, caption, None).await?;
                continue;
            }
            let body = json!({
                "chat_id": chat_id,
                "media": album_media(chunk, caption),
            });
            self.call::<Value>("sendMediaGroup", &body).await?;
        }
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> PortResult<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<bool>("answerCallbackQuery", &body).await.map(|_| ())
    }
}

//=========================================================================================
// Wire Rendering
//=========================================================================================

/// Renders a keyboard as a Bot API `reply_markup` object.
pub fn markup_json(markup: &Keyboard) -> Value {
    match markup {
        Keyboard::Inline(rows) => json!({
            "inline_keyboard": rows
                .iter()
                .map(|row| row.iter().map(inline_button).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
        }),
        Keyboard::Reply { rows, one_time } => json!({
            "keyboard": rows
                .iter()
                .map(|row| row.iter().map(reply_button).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
            "resize_keyboard": true,
            "one_time_keyboard": one_time,
        }),
        Keyboard::RemoveReply => json!({ "remove_keyboard": true }),
    }
}

fn inline_button(button: &InlineButton) -> Value {
    json!({ "text": button.text, "callback_data": button.data })
}

fn reply_button(button: &ReplyButton) -> Value {
    if button.request_contact {
        json!({ "text": button.text, "request_contact": true })
    } else {
        json!({ "text": button.text })
    }
}

/// The `media` array of one album; only the first item carries the caption.
pub fn album_media(photos: &[PhotoRef], caption: Option<&str>) -> Vec<Value> {
    photos
        .iter()
        .enumerate()
        .map(|(i, photo)| {
            let mut item = json!({ "type": "photo", "media": photo.file_id() });
            if let (0, Some(caption)) = (i, caption) {
                item["caption"] = json!(caption);
                item["parse_mode"] = json!(PARSE_MODE);
            }
            item
        })
        .collect()
}
