//! voicetasks - Telegram voice messages to ClickUp tasks.
//!
//! An hourly batch pipeline: poll a Telegram group for voice and audio
//! messages, transcribe them with Whisper, extract structured task
//! candidates with a chat model, and create the tasks in ClickUp. A
//! persisted cursor keeps re-runs idempotent; every run leaves a markdown
//! log and a replayable JSON payload behind.

pub mod assignees;
pub mod cli;
pub mod clients;
pub mod config;
pub mod domain;
pub mod duedate;
pub mod error;
pub mod retry;
pub mod run;
pub mod state;

pub use config::{Config, Secrets};
pub use error::ClientError;
pub use run::{Orchestrator, RunOptions, RunReport};
