//! Replay a saved task payload against ClickUp.
//!
//! Reads a `tasks_to_create_*.json` file (the newest one by default),
//! creates every task that does not yet have a remote id, and writes the
//! updated payload next to the original as `*_with_clickup.json`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use voicetasks::clients::clickup::{build_task_payload, ClickUpClient};
use voicetasks::clients::TaskSink;
use voicetasks::config::{Config, Secrets};
use voicetasks::retry::RetryPolicy;
use voicetasks::run::RunReport;
use voicetasks::state::atomic_write;

/// Recreate ClickUp tasks from a saved run payload
#[derive(Parser, Debug)]
#[command(name = "recreate-tasks")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Payload file to replay; defaults to the newest tasks_to_create_*.json
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let config = Config::load()?;

    let path = match args.file {
        Some(path) => path,
        None => newest_payload(&config)?,
    };
    println!("Replaying {}", path.display());

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut report: RunReport = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    if config.clickup_list_id.is_empty() {
        anyhow::bail!("clickup_list_id is not configured; set it in config.json");
    }

    let token = Secrets::load_clickup_token()?;
    let clickup = ClickUpClient::new(
        token,
        config.clickup_list_id.clone(),
        config.clickup_team_id.clone(),
        RetryPolicy::with_max_attempts(config.openai_max_attempts),
    );

    let mut created = 0usize;
    let mut failed = 0usize;

    for task in report.messages.iter_mut().flat_map(|m| &mut m.tasks) {
        if task.task_id.is_some() {
            continue;
        }

        let payload = build_task_payload(&task.candidate, config.utc_offset_hours);
        match clickup.create_task(&payload).await {
            Ok(task_id) => {
                println!("  created {} -> {}", task.candidate.title, task_id);
                task.task_id = Some(task_id);
                task.created_at = Some(chrono::Utc::now());
                task.error = None;
                created += 1;
            }
            Err(err) => {
                eprintln!("  failed {}: {}", task.candidate.title, err);
                task.error = Some(err.to_string());
                failed += 1;
            }
        }
    }

    let out_path = output_path(&path);
    let updated = serde_json::to_string_pretty(&report)?;
    atomic_write(&out_path, &updated)
        .with_context(|| format!("Failed to write {}", out_path.display()))?;

    println!(
        "Done: {} created, {} failed, result in {}",
        created,
        failed,
        out_path.display()
    );

    if failed > 0 {
        anyhow::bail!("{} task(s) still failed", failed);
    }
    Ok(())
}

/// Newest payload by file name; the timestamp format sorts lexically
fn newest_payload(config: &Config) -> Result<PathBuf> {
    let pattern = config.data_dir.join("tasks_to_create_*.json");
    let pattern = pattern.to_str().context("data directory is not UTF-8")?;

    let mut paths: Vec<PathBuf> = glob::glob(pattern)
        .context("Invalid payload pattern")?
        .flatten()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.ends_with("_with_clickup.json"))
        })
        .collect();
    paths.sort();

    paths
        .pop()
        .context("No tasks_to_create_*.json files found; run voicetasks first")
}

fn output_path(input: &PathBuf) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("tasks");
    input.with_file_name(format!("{}_with_clickup.json", stem))
}
