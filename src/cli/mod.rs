//! Command-line interface for voicetasks.
//!
//! `run` executes one poll-transcribe-extract-create cycle, `config` prints
//! the resolved configuration. An exclusive lock file guards against
//! overlapping runs from cron.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fs2::FileExt;

use crate::clients::{ClickUpClient, OpenAiClient, TelegramClient};
use crate::config::{print_config, Config, Secrets};
use crate::retry::RetryPolicy;
use crate::run::{Orchestrator, RunOptions};
use crate::state::FileStateStore;

/// voicetasks - Telegram voice messages to ClickUp tasks
#[derive(Parser, Debug)]
#[command(name = "voicetasks")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll for new voice messages and create tasks
    Run {
        /// Run the full pipeline without creating tasks or moving the cursor
        #[arg(long)]
        dry_run: bool,

        /// Process at most this many messages
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { dry_run, limit } => run(RunOptions { dry_run, limit }).await,
            Commands::Config => show_config(),
        }
    }
}

async fn run(options: RunOptions) -> Result<()> {
    let config = Config::load()?;
    let secrets = Secrets::load()?;

    if config.clickup_list_id.is_empty() {
        anyhow::bail!("clickup_list_id is not configured; set it in config.json");
    }

    let _lock = RunLock::acquire(&config.lock_path())?;

    let retry = RetryPolicy::with_max_attempts(config.openai_max_attempts);

    let telegram = Arc::new(TelegramClient::new(
        secrets.bot_token,
        &secrets.chat_id,
        retry.clone(),
    )?);
    let openai = Arc::new(OpenAiClient::new(
        secrets.openai_api_key,
        config.transcription_language.clone(),
        retry.clone(),
    ));
    let clickup = Arc::new(
        ClickUpClient::new(
            secrets.clickup_token,
            config.clickup_list_id.clone(),
            config.clickup_team_id.clone(),
            retry,
        )
        .with_member_cache(config.member_cache_path(), config.clickup_member_cache_hours),
    );
    let state = Arc::new(FileStateStore::new(config.state_path()));

    let transcriber: Arc<dyn crate::clients::SpeechToText> = openai.clone();
    let extractor: Arc<dyn crate::clients::TaskExtractor> = openai;

    let orchestrator = Orchestrator::new(config, state, telegram, transcriber, extractor, clickup)
        .with_summary_chat(secrets.chat_id);

    let report = orchestrator.run(options).await?;

    if options.dry_run {
        println!("Dry run: {} task(s) would be created", report.tasks_total());
        for task in report.messages.iter().flat_map(|m| &m.tasks) {
            println!("  - {}", task.candidate.title);
        }
    } else {
        println!("{}", report.summary_message());
    }

    if report.incomplete {
        anyhow::bail!("run did not finish cleanly, see the processing log");
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let config = Config::load()?;
    print_config(&config);
    Ok(())
}

/// Exclusive lock held for the duration of a run.
///
/// The lock file itself stays on disk; only the flock is released on drop,
/// so a crashed run never wedges the next one.
struct RunLock {
    file: std::fs::File,
    path: PathBuf,
}

impl RunLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!(
                "Another run is already in progress (lock: {})",
                path.display()
            )
        })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to release lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_excludes_second_holder() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".processor.lock");

        let first = RunLock::acquire(&path).unwrap();
        assert!(RunLock::acquire(&path).is_err());

        drop(first);
        assert!(RunLock::acquire(&path).is_ok());
    }
}
