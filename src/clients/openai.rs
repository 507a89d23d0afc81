//! OpenAI client: Whisper transcription and task extraction.
//!
//! Transcription uploads audio as multipart to the Whisper endpoint.
//! Extraction sends the transcript through a chat completion with a fixed
//! prompt contract and validates the JSON that comes back; anything
//! malformed surfaces as a per-message `Validation` error.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::domain::{ExtractedTask, Transcript};
use crate::error::ClientError;
use crate::retry::RetryPolicy;

use super::{ensure_success, SpeechToText, TaskExtractor};

const TRANSCRIPTION_MODEL: &str = "whisper-1";
const EXTRACTION_MODEL: &str = "gpt-4o-mini";

/// OpenAI API client
pub struct OpenAiClient {
    api_key: String,
    /// Transcription language hint (e.g. "ru"); `None` lets Whisper detect
    language: Option<String>,
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// JSON object shape the extraction prompt asks for
#[derive(Debug, Deserialize)]
struct ExtractionEnvelope {
    tasks: Vec<ExtractedTask>,
}

impl OpenAiClient {
    pub fn new(api_key: String, language: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            api_key,
            language,
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            retry,
        }
    }

    /// Override the API base URL (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn extraction_prompt(transcript: &str) -> String {
        format!(
            r#"Analyze the following voice message transcript and extract every task it mentions.
For each task determine:
- name: short task title (up to 100 characters)
- description: detailed description
- due_date: deadline if mentioned, as YYYY-MM-DD, otherwise null
- priority: 1 (urgent), 2 (high), 3 (normal) or 4 (low)
- assignee: person's name if mentioned, otherwise null

Respond with a JSON object of the form:
{{"tasks": [{{"name": "...", "description": "...", "due_date": "2025-10-05" or null, "priority": 3, "assignee": "Name" or null}}]}}

Transcript:
{transcript}"#
        )
    }
}

#[async_trait]
impl SpeechToText for OpenAiClient {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<Transcript, ClientError> {
        let url = format!("{}/audio/transcriptions", self.base_url);

        let response: TranscriptionResponse = self
            .retry
            .call("whisper transcription", || {
                // Multipart forms are not reusable, so rebuild per attempt
                let file_part = reqwest::multipart::Part::bytes(audio.clone())
                    .file_name(file_name.to_string());

                let mut form = reqwest::multipart::Form::new()
                    .text("model", TRANSCRIPTION_MODEL)
                    .text("response_format", "verbose_json")
                    .part("file", file_part);

                if let Some(language) = &self.language {
                    form = form.text("language", language.clone());
                }

                let request = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .multipart(form);

                async move {
                    let response = ensure_success(request.send().await?).await?;
                    Ok(response.json::<TranscriptionResponse>().await?)
                }
            })
            .await?;

        let language = response
            .language
            .or_else(|| self.language.clone())
            .unwrap_or_else(|| "en".to_string());

        Ok(Transcript {
            text: response.text.trim().to_string(),
            language,
        })
    }
}

#[async_trait]
impl TaskExtractor for OpenAiClient {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedTask>, ClientError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = serde_json::json!({
            "model": EXTRACTION_MODEL,
            "temperature": 0.3,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "user", "content": Self::extraction_prompt(text)}
            ],
        });

        let response: ChatResponse = self
            .retry
            .call("task extraction", || {
                let request = self
                    .client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&payload);

                async move {
                    let response = ensure_success(request.send().await?).await?;
                    Ok(response.json::<ChatResponse>().await?)
                }
            })
            .await?;

        let content = response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| {
                ClientError::Validation("extraction response has no choices".to_string())
            })?;

        let tasks = parse_extraction(content)?;
        debug!(count = tasks.len(), "Extracted task candidates");

        Ok(tasks)
    }
}

/// Parse and validate the model's JSON output.
///
/// Accepts either the requested `{"tasks": [...]}` envelope or a bare
/// array, with or without markdown code fences.
pub fn parse_extraction(content: &str) -> Result<Vec<ExtractedTask>, ClientError> {
    let stripped = strip_code_fences(content.trim());

    let tasks = if let Ok(envelope) = serde_json::from_str::<ExtractionEnvelope>(stripped) {
        envelope.tasks
    } else {
        serde_json::from_str::<Vec<ExtractedTask>>(stripped).map_err(|e| {
            ClientError::Validation(format!("extraction output is not valid task JSON: {}", e))
        })?
    };

    for (idx, task) in tasks.iter().enumerate() {
        if task.title.trim().is_empty() {
            return Err(ClientError::Validation(format!(
                "extracted task #{} has an empty title",
                idx
            )));
        }
    }

    Ok(tasks)
}

fn strip_code_fences(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}
