//! External service clients.
//!
//! Each client implements a narrow trait so the orchestrator can be tested
//! against in-memory fakes. All three share [`crate::retry::RetryPolicy`]
//! and the [`crate::error::ClientError`] taxonomy.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Transcript, VoiceMessage};
use crate::error::ClientError;

pub mod clickup;
pub mod openai;
pub mod telegram;

pub use clickup::{ClickUpClient, TaskPayload};
pub use openai::OpenAiClient;
pub use telegram::TelegramClient;

/// Result of polling the messaging service
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    /// Audio-bearing messages in arrival order
    pub messages: Vec<VoiceMessage>,

    /// Highest update id observed across ALL updates, not just audio ones
    pub max_update_id: Option<i64>,
}

/// Polls the messaging service for new audio messages
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch audio messages newer than the cursor. With no cursor, only
    /// messages from the last `check_hours` are considered.
    async fn fetch_since(
        &self,
        cursor: Option<i64>,
        check_hours: u32,
    ) -> Result<FetchResult, ClientError>;

    /// Download the audio payload for a message
    async fn download_audio(&self, file_id: &str) -> Result<Vec<u8>, ClientError>;

    /// Send a plain text message (used for the run summary)
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ClientError>;
}

/// Converts audio bytes to text
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<Transcript, ClientError>;
}

/// Extracts task candidates from transcript text
#[async_trait]
pub trait TaskExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<crate::domain::ExtractedTask>, ClientError>;
}

/// Creates tasks (and reminders) in the tracking service
#[async_trait]
pub trait TaskSink: Send + Sync {
    /// Create a task, returning its remote id
    async fn create_task(&self, payload: &TaskPayload) -> Result<String, ClientError>;

    /// Create a reminder for an existing task. Failures here are warnings,
    /// never batch failures.
    async fn create_reminder(
        &self,
        task_id: &str,
        remind_at_ms: i64,
        assignee: Option<i64>,
    ) -> Result<(), ClientError>;

    /// Normalized member name -> member ids for assignee resolution
    async fn member_map(&self) -> Result<HashMap<String, Vec<i64>>, ClientError>;
}

/// Map a response to `ClientError` unless it is a success status
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response.text().await.unwrap_or_default();
    let truncated: String = body.chars().take(500).collect();

    Err(ClientError::from_status(status, retry_after, truncated))
}
