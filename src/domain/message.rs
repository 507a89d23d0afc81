//! Voice/audio messages fetched from Telegram and their transcripts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of audio payload attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioKind {
    /// Telegram voice note (opus/ogg)
    Voice,

    /// Regular audio file attachment
    Audio,
}

impl std::fmt::Display for AudioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Voice => write!(f, "voice"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// An audio-bearing message pulled from the Telegram group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceMessage {
    /// Telegram update id (the processing cursor is the max of these)
    pub update_id: i64,

    /// File id used with the getFile/download endpoints
    pub file_id: String,

    /// Sender first name, channel title, or "Unknown"
    pub from_user: String,

    /// When the message was sent
    pub date: DateTime<Utc>,

    /// Audio duration in seconds as reported by Telegram
    pub duration_seconds: u32,

    /// Voice note or audio attachment
    pub kind: AudioKind,

    /// MIME type of the payload (drives the temp file suffix)
    pub mime_type: String,

    /// True when the message was forwarded into the group
    pub is_forwarded: bool,
}

impl VoiceMessage {
    /// Pick a file suffix for the audio payload based on its MIME type
    pub fn file_suffix(&self) -> &'static str {
        let mime = self.mime_type.to_lowercase();
        if mime.contains("ogg") {
            ".ogg"
        } else if mime.contains("mpeg") || mime.contains("mp3") {
            ".mp3"
        } else if mime.contains("mp4") || mime.contains("m4a") {
            ".m4a"
        } else if mime.contains("wav") {
            ".wav"
        } else {
            ".ogg"
        }
    }
}

/// Result of transcribing one audio payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// Plain transcript text, trimmed
    pub text: String,

    /// Detected language tag (falls back to the requested language)
    pub language: String,
}
