//! Configuration and secrets loading.
//!
//! Configuration sources:
//! 1. `VOICETASKS_HOME` environment variable (data directory override)
//! 2. `config.json` in the data directory
//!
//! Secrets sources (highest priority first):
//! 1. Environment variables (TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID,
//!    OPENAI_API_KEY, CLICKUP_TOKEN)
//! 2. `~/.api_secret_infos/api_secrets.json`
//!
//! Raw values are normalized in one pass: priorities clamped to 1..=4,
//! worker counts floored at 1, retention windows floored at 0.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::Priority;

/// Raw config file schema (matches config.json; everything optional)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub clickup_list_id: Option<serde_json::Value>,
    pub clickup_team_id: Option<serde_json::Value>,
    pub telegram_check_hours: Option<i64>,
    pub default_priority: Option<i64>,
    pub log_retention_days: Option<i64>,
    pub tasks_retention_days: Option<i64>,
    pub store_transcriptions: Option<serde_json::Value>,
    pub transcription_max_chars: Option<i64>,
    pub transcription_language: Option<String>,
    pub clickup_member_cache_hours: Option<i64>,
    pub openai_max_workers: Option<i64>,
    pub openai_max_attempts: Option<i64>,
    pub download_max_workers: Option<i64>,
    pub create_clickup_reminders: Option<serde_json::Value>,
    pub reminder_offset_hours: Option<i64>,
    pub send_summary_to_telegram: Option<serde_json::Value>,
    pub summary_chat_id: Option<serde_json::Value>,
    pub utc_offset_hours: Option<i64>,
    pub run_timeout_minutes: Option<i64>,
    #[serde(default)]
    pub assignee_map: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub assignee_aliases: HashMap<String, String>,
}

/// Normalized configuration with all defaults applied
#[derive(Debug, Clone)]
pub struct Config {
    /// Target ClickUp list for task creation
    pub clickup_list_id: String,
    /// Team id, required only for reminder creation
    pub clickup_team_id: Option<String>,
    /// Time window for the first run (no stored cursor)
    pub telegram_check_hours: u32,
    pub default_priority: Priority,
    pub log_retention_days: u32,
    pub tasks_retention_days: u32,
    pub store_transcriptions: bool,
    pub transcription_max_chars: usize,
    /// Whisper language hint; `None` lets the model detect
    pub transcription_language: Option<String>,
    pub clickup_member_cache_hours: u32,
    pub openai_max_workers: usize,
    pub openai_max_attempts: u32,
    pub download_max_workers: usize,
    pub create_clickup_reminders: bool,
    pub reminder_offset_hours: u32,
    pub send_summary_to_telegram: bool,
    /// Chat for the run summary; empty means "use the polled chat"
    pub summary_chat_id: String,
    /// Fixed UTC offset used for due-date resolution
    pub utc_offset_hours: i32,
    /// Overall run deadline
    pub run_timeout_minutes: u32,
    /// Config-provided assignee name -> member ids (overrides remote map)
    pub assignee_map: HashMap<String, serde_json::Value>,
    /// Nickname -> canonical assignee name
    pub assignee_aliases: HashMap<String, String>,
    /// Data directory holding state.json, logs/ and .cache/
    pub data_dir: PathBuf,
}

const DEFAULT_LOG_RETENTION_DAYS: u32 = 30;
const DEFAULT_TASK_RETENTION_DAYS: u32 = 30;
const DEFAULT_TRANSCRIPTION_MAX_CHARS: usize = 4000;
const DEFAULT_TRANSCRIPTION_LANGUAGE: &str = "ru";
const DEFAULT_REMINDER_OFFSET_HOURS: u32 = 2;
const DEFAULT_MAX_WORKERS: usize = 3;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_DOWNLOAD_WORKERS: usize = 3;
const DEFAULT_UTC_OFFSET_HOURS: i32 = 3;
const DEFAULT_RUN_TIMEOUT_MINUTES: u32 = 50;

impl Config {
    /// Load config.json from the data directory and normalize it
    pub fn load() -> Result<Self> {
        let data_dir = data_dir();
        let config_path = data_dir.join("config.json");

        let raw: ConfigFile = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            serde_json::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            ConfigFile::default()
        };

        Ok(Self::from_raw(raw, data_dir))
    }

    /// Normalize a raw config (clamps, defaults, string coercion)
    pub fn from_raw(raw: ConfigFile, data_dir: PathBuf) -> Self {
        let clickup_list_id = value_to_string(raw.clickup_list_id).unwrap_or_default();
        let clickup_team_id = value_to_string(raw.clickup_team_id).filter(|s| !s.is_empty());

        Self {
            clickup_list_id,
            clickup_team_id,
            telegram_check_hours: raw.telegram_check_hours.unwrap_or(1).max(1) as u32,
            default_priority: Priority::from_raw(raw.default_priority, Priority::Normal),
            log_retention_days: clamp_days(raw.log_retention_days, DEFAULT_LOG_RETENTION_DAYS),
            tasks_retention_days: clamp_days(raw.tasks_retention_days, DEFAULT_TASK_RETENTION_DAYS),
            store_transcriptions: value_to_bool(raw.store_transcriptions, true),
            transcription_max_chars: raw
                .transcription_max_chars
                .map(|v| v.max(0) as usize)
                .unwrap_or(DEFAULT_TRANSCRIPTION_MAX_CHARS),
            transcription_language: match raw.transcription_language.as_deref().map(str::trim) {
                None => Some(DEFAULT_TRANSCRIPTION_LANGUAGE.to_string()),
                Some("") => None,
                Some(lang) => Some(lang.to_lowercase()),
            },
            clickup_member_cache_hours: raw
                .clickup_member_cache_hours
                .map(|v| v.max(0) as u32)
                .unwrap_or(1),
            openai_max_workers: raw
                .openai_max_workers
                .map(|v| v.max(1) as usize)
                .unwrap_or(DEFAULT_MAX_WORKERS),
            openai_max_attempts: raw
                .openai_max_attempts
                .filter(|v| *v > 0)
                .map(|v| v as u32)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            download_max_workers: raw
                .download_max_workers
                .map(|v| v.max(1) as usize)
                .unwrap_or(DEFAULT_DOWNLOAD_WORKERS),
            create_clickup_reminders: value_to_bool(raw.create_clickup_reminders, true),
            reminder_offset_hours: raw
                .reminder_offset_hours
                .map(|v| v.max(0) as u32)
                .unwrap_or(DEFAULT_REMINDER_OFFSET_HOURS),
            send_summary_to_telegram: value_to_bool(raw.send_summary_to_telegram, false),
            summary_chat_id: value_to_string(raw.summary_chat_id).unwrap_or_default(),
            utc_offset_hours: raw
                .utc_offset_hours
                .filter(|v| (-12..=14).contains(v))
                .map(|v| v as i32)
                .unwrap_or(DEFAULT_UTC_OFFSET_HOURS),
            run_timeout_minutes: raw
                .run_timeout_minutes
                .filter(|v| *v > 0)
                .map(|v| v as u32)
                .unwrap_or(DEFAULT_RUN_TIMEOUT_MINUTES),
            assignee_map: raw.assignee_map,
            assignee_aliases: raw.assignee_aliases,
            data_dir,
        }
    }

    /// Reminders need both a team id and the feature toggle
    pub fn reminders_enabled(&self) -> bool {
        self.create_clickup_reminders && self.clickup_team_id.is_some()
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(".processor.lock")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn member_cache_path(&self) -> PathBuf {
        self.data_dir.join(".cache").join("clickup_members.json")
    }
}

/// Data directory: $VOICETASKS_HOME or the current directory
pub fn data_dir() -> PathBuf {
    std::env::var("VOICETASKS_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn clamp_days(value: Option<i64>, default: u32) -> u32 {
    value.map(|v| v.max(0) as u32).unwrap_or(default)
}

fn value_to_string(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_bool(value: Option<serde_json::Value>, default: bool) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(default),
        _ => default,
    }
}

/// API credentials for the three external services
#[derive(Debug, Clone)]
pub struct Secrets {
    pub bot_token: String,
    pub chat_id: String,
    pub openai_api_key: String,
    pub clickup_token: String,
}

/// Secrets file schema (~/.api_secret_infos/api_secrets.json)
#[derive(Debug, Default, Deserialize)]
struct SecretsFile {
    #[serde(rename = "TELEGRAM", default)]
    telegram: SecretsSection,
    #[serde(rename = "OPENAI", default)]
    openai: SecretsSection,
    #[serde(rename = "CLICKUP", default)]
    clickup: SecretsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SecretsSection {
    #[serde(default)]
    secrets: HashMap<String, String>,
}

impl Secrets {
    /// Load secrets from env vars, filling gaps from the secrets file
    pub fn load() -> Result<Self> {
        let file = load_secrets_file().unwrap_or_default();

        let bot_token = env_or(&file.telegram, "TELEGRAM_BOT_TOKEN", &["BOT_TOKEN"]);
        let chat_id = env_or(&file.telegram, "TELEGRAM_CHAT_ID", &["CHAT_ID"]);
        let openai_api_key = env_or(&file.openai, "OPENAI_API_KEY", &["API_KEY"]);
        let clickup_token = env_or(&file.clickup, "CLICKUP_TOKEN", &["API_TOKEN", "TOKEN"]);

        let missing: Vec<&str> = [
            ("TELEGRAM_BOT_TOKEN", &bot_token),
            ("TELEGRAM_CHAT_ID", &chat_id),
            ("OPENAI_API_KEY", &openai_api_key),
            ("CLICKUP_TOKEN", &clickup_token),
        ]
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| *k)
        .collect();

        if !missing.is_empty() {
            anyhow::bail!(
                "Missing credentials: {}. Set the environment variables or add them to \
                 ~/.api_secret_infos/api_secrets.json",
                missing.join(", ")
            );
        }

        Ok(Self {
            bot_token: bot_token.unwrap(),
            chat_id: chat_id.unwrap(),
            openai_api_key: openai_api_key.unwrap(),
            clickup_token: clickup_token.unwrap(),
        })
    }

    /// Load only the ClickUp token (for the recreate utility)
    pub fn load_clickup_token() -> Result<String> {
        let file = load_secrets_file().unwrap_or_default();
        env_or(&file.clickup, "CLICKUP_TOKEN", &["API_TOKEN", "TOKEN"]).context(
            "CLICKUP_TOKEN is not set and ~/.api_secret_infos/api_secrets.json has no CLICKUP section",
        )
    }
}

fn env_or(section: &SecretsSection, env_key: &str, file_keys: &[&str]) -> Option<String> {
    if let Ok(value) = std::env::var(env_key) {
        if !value.is_empty() {
            return Some(value);
        }
    }

    file_keys
        .iter()
        .find_map(|k| section.secrets.get(*k))
        .filter(|v| !v.is_empty())
        .cloned()
}

fn load_secrets_file() -> Option<SecretsFile> {
    let path = secrets_path()?;
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn secrets_path() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    let path = home.join(".api_secret_infos").join("api_secrets.json");
    path.exists().then_some(path)
}

/// Pretty-print the resolved configuration (debug aid)
pub fn print_config(config: &Config) {
    println!("Data directory: {}", config.data_dir.display());
    println!("  State:  {}", config.state_path().display());
    println!("  Logs:   {}", config.logs_dir().display());
    println!();
    println!("ClickUp list id:      {}", display_or_unset(&config.clickup_list_id));
    println!(
        "ClickUp team id:      {}",
        config.clickup_team_id.as_deref().unwrap_or("(unset)")
    );
    println!("Reminders enabled:    {}", config.reminders_enabled());
    println!("Check window (hours): {}", config.telegram_check_hours);
    println!("Default priority:     {}", config.default_priority.as_u8());
    println!("UTC offset (hours):   {}", config.utc_offset_hours);
    println!("Run timeout (min):    {}", config.run_timeout_minutes);
    println!("Download workers:     {}", config.download_max_workers);
    println!("OpenAI workers:       {}", config.openai_max_workers);
    println!("OpenAI max attempts:  {}", config.openai_max_attempts);
    println!("Log retention (days): {}", config.log_retention_days);
    println!("Task retention (days): {}", config.tasks_retention_days);
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(unset)"
    } else {
        value
    }
}
