//! Telegram Bot API client.
//!
//! Polls `getUpdates` for voice and audio messages in the configured chat,
//! downloads audio payloads, and sends the run summary message.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::domain::{AudioKind, VoiceMessage};
use crate::error::ClientError;
use crate::retry::RetryPolicy;

use super::{ensure_success, FetchResult, MessageSource};

/// Page size for getUpdates
const UPDATES_PAGE_LIMIT: u32 = 100;

/// Telegram Bot API client
pub struct TelegramClient {
    /// Bot token
    bot_token: String,
    /// Chat whose messages are processed
    chat_id: i64,
    /// API base (overridable for tests)
    base_url: String,
    /// HTTP client
    client: reqwest::Client,
    /// Shared retry policy
    retry: RetryPolicy,
}

/// Envelope for all Bot API responses
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
    channel_post: Option<TgMessage>,
    edited_message: Option<TgMessage>,
}

impl Update {
    fn message(&self) -> Option<&TgMessage> {
        self.message
            .as_ref()
            .or(self.channel_post.as_ref())
            .or(self.edited_message.as_ref())
    }
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    chat: TgChat,
    date: i64,
    from: Option<TgUser>,
    forward_from: Option<TgUser>,
    forward_origin: Option<serde_json::Value>,
    sender_chat: Option<TgChat>,
    voice: Option<TgAudio>,
    audio: Option<TgAudio>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgAudio {
    file_id: String,
    #[serde(default)]
    duration: u32,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: String,
}

impl TelegramClient {
    /// Create a new Telegram client. Fails if `chat_id` is not numeric.
    pub fn new(bot_token: String, chat_id: &str, retry: RetryPolicy) -> Result<Self, ClientError> {
        let chat_id = chat_id
            .trim()
            .parse()
            .map_err(|_| ClientError::Validation(format!("chat_id is not numeric: {}", chat_id)))?;

        Ok(Self {
            bot_token,
            chat_id,
            base_url: "https://api.telegram.org".to_string(),
            client: reqwest::Client::new(),
            retry,
        })
    }

    /// Override the API base URL (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build API URL for a Bot API method
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }

    /// Build download URL for a file path returned by getFile
    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.base_url, self.bot_token, file_path)
    }

    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, ClientError> {
        let url = self.api_url("getUpdates");

        self.retry
            .call("telegram getUpdates", || {
                let mut params = vec![("limit", UPDATES_PAGE_LIMIT.to_string())];
                if let Some(offset) = offset {
                    params.push(("offset", offset.to_string()));
                }
                let request = self.client.get(&url).query(&params);

                async move {
                    let response = ensure_success(request.send().await?).await?;
                    let body: TelegramResponse<Vec<Update>> = response.json().await?;

                    if !body.ok {
                        return Err(ClientError::Validation(format!(
                            "Telegram API error: {}",
                            body.description.unwrap_or_default()
                        )));
                    }

                    Ok(body.result.unwrap_or_default())
                }
            })
            .await
    }

    /// Convert one update into a VoiceMessage, if it carries audio in our chat
    fn to_voice_message(
        &self,
        update: &Update,
        cutoff: Option<DateTime<Utc>>,
    ) -> Option<VoiceMessage> {
        let message = update.message()?;

        if message.chat.id != self.chat_id {
            return None;
        }

        let date = DateTime::<Utc>::from_timestamp(message.date, 0)?;
        if let Some(cutoff) = cutoff {
            if date <= cutoff {
                return None;
            }
        }

        let (audio, kind) = if let Some(voice) = &message.voice {
            (voice, AudioKind::Voice)
        } else if let Some(audio) = &message.audio {
            (audio, AudioKind::Audio)
        } else {
            return None;
        };

        let from_user = message
            .from
            .as_ref()
            .and_then(|u| u.first_name.clone())
            .or_else(|| {
                message
                    .forward_from
                    .as_ref()
                    .and_then(|u| u.first_name.clone())
            })
            .or_else(|| forwarded_sender_name(message.forward_origin.as_ref()))
            .or_else(|| message.sender_chat.as_ref().and_then(|c| c.title.clone()))
            .unwrap_or_else(|| "Unknown".to_string());

        Some(VoiceMessage {
            update_id: update.update_id,
            file_id: audio.file_id.clone(),
            from_user,
            date,
            duration_seconds: audio.duration,
            kind,
            mime_type: audio
                .mime_type
                .clone()
                .unwrap_or_else(|| "audio/ogg".to_string()),
            is_forwarded: message.forward_from.is_some() || message.forward_origin.is_some(),
        })
    }
}

fn forwarded_sender_name(origin: Option<&serde_json::Value>) -> Option<String> {
    let origin = origin?;
    if origin.get("type")?.as_str()? != "user" {
        return None;
    }
    origin
        .get("sender_user")?
        .get("first_name")?
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl MessageSource for TelegramClient {
    async fn fetch_since(
        &self,
        cursor: Option<i64>,
        check_hours: u32,
    ) -> Result<FetchResult, ClientError> {
        // With no cursor, only a recent time window is considered; with a
        // cursor the offset alone bounds what we see.
        let cutoff = match cursor {
            None if check_hours > 0 => Some(Utc::now() - Duration::hours(check_hours as i64)),
            _ => None,
        };

        let mut result = FetchResult {
            max_update_id: cursor,
            ..Default::default()
        };
        let mut offset = cursor.map(|c| c + 1);

        loop {
            let updates = self.get_updates(offset).await?;
            let page_len = updates.len();

            for update in &updates {
                result.max_update_id = Some(
                    result
                        .max_update_id
                        .map_or(update.update_id, |m| m.max(update.update_id)),
                );

                if let Some(vm) = self.to_voice_message(update, cutoff) {
                    debug!(
                        update_id = vm.update_id,
                        from = %vm.from_user,
                        kind = %vm.kind,
                        "Found audio message"
                    );
                    result.messages.push(vm);
                }
            }

            if page_len < UPDATES_PAGE_LIMIT as usize {
                break;
            }

            let Some(max_id) = result.max_update_id else {
                break;
            };
            offset = Some(max_id + 1);
        }

        Ok(result)
    }

    async fn download_audio(&self, file_id: &str) -> Result<Vec<u8>, ClientError> {
        // Resolve the server-side file path first
        let url = self.api_url("getFile");
        let file = self
            .retry
            .call("telegram getFile", || {
                let request = self.client.get(&url).query(&[("file_id", file_id)]);
                async move {
                    let response = ensure_success(request.send().await?).await?;
                    let body: TelegramResponse<TgFile> = response.json().await?;

                    if !body.ok {
                        return Err(ClientError::Validation(format!(
                            "Telegram API error: {}",
                            body.description.unwrap_or_default()
                        )));
                    }

                    body.result.ok_or_else(|| {
                        ClientError::Validation("getFile returned no result".to_string())
                    })
                }
            })
            .await?;

        let download_url = self.file_url(&file.file_path);
        let bytes = self
            .retry
            .call("telegram file download", || {
                let request = self.client.get(&download_url);
                async move {
                    let response = ensure_success(request.send().await?).await?;
                    Ok(response.bytes().await?.to_vec())
                }
            })
            .await?;

        Ok(bytes)
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ClientError> {
        let url = self.api_url("sendMessage");
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        self.retry
            .call("telegram sendMessage", || {
                let request = self.client.post(&url).json(&payload);
                async move {
                    let response = ensure_success(request.send().await?).await?;
                    let body: TelegramResponse<serde_json::Value> = response.json().await?;

                    if !body.ok {
                        return Err(ClientError::Validation(format!(
                            "Telegram API error: {}",
                            body.description.unwrap_or_default()
                        )));
                    }

                    Ok(())
                }
            })
            .await
    }
}
