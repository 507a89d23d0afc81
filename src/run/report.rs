//! Run reports: JSON artifacts, markdown logs, retention cleanup.
//!
//! Every run produces a markdown processing log under `logs/` and, when any
//! tasks were extracted, a `tasks_to_create_*.json` payload file next to the
//! state file. The payload file is what the recreate utility replays.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{AudioKind, TaskCandidate};
use crate::state::atomic_write;

/// Outcome of one extracted task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    #[serde(flatten)]
    pub candidate: TaskCandidate,

    /// Remote task id; `None` in dry-run or on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// When the create call was acknowledged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskReport {
    pub fn created(&self) -> bool {
        self.task_id.is_some()
    }
}

/// Outcome of one audio message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReport {
    pub update_id: i64,
    pub from_user: String,
    pub date: DateTime<Utc>,
    pub kind: AudioKind,
    pub duration_seconds: u32,

    /// Transcript text, possibly truncated; absent when storing is disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,

    /// Stage failure that stopped this message (download, transcription,
    /// extraction or timeout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub tasks: Vec<TaskReport>,
}

/// Full account of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id tying the log, payload and tracing output together
    pub run_id: uuid::Uuid,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,

    pub cursor_before: Option<i64>,
    pub cursor_after: Option<i64>,

    /// True when the run could not finish cleanly (fatal error, timeout,
    /// or a failed state write)
    #[serde(default)]
    pub incomplete: bool,

    #[serde(default)]
    pub messages: Vec<MessageReport>,
}

impl RunReport {
    pub fn messages_failed(&self) -> usize {
        self.messages.iter().filter(|m| m.error.is_some()).count()
    }

    pub fn tasks_created(&self) -> usize {
        self.messages
            .iter()
            .flat_map(|m| &m.tasks)
            .filter(|t| t.created())
            .count()
    }

    pub fn tasks_failed(&self) -> usize {
        self.messages
            .iter()
            .flat_map(|m| &m.tasks)
            .filter(|t| t.error.is_some())
            .count()
    }

    pub fn tasks_total(&self) -> usize {
        self.messages.iter().map(|m| m.tasks.len()).sum()
    }

    /// Render the markdown processing log
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();

        out.push_str("# Voice message processing log\n\n");
        out.push_str(&format!("- Run id: {}\n", self.run_id));
        out.push_str(&format!(
            "- Started: {}\n",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out.push_str(&format!(
            "- Finished: {}\n",
            self.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if self.dry_run {
            out.push_str("- Mode: dry run (no tasks created)\n");
        }
        out.push_str(&format!(
            "- Cursor: {} -> {}\n",
            display_cursor(self.cursor_before),
            display_cursor(self.cursor_after)
        ));
        out.push_str(&format!(
            "- Messages: {} processed, {} failed\n",
            self.messages.len(),
            self.messages_failed()
        ));
        out.push_str(&format!(
            "- Tasks: {} created, {} failed\n",
            self.tasks_created(),
            self.tasks_failed()
        ));
        if self.incomplete {
            out.push_str("- **Run incomplete**: see errors below\n");
        }

        for message in &self.messages {
            out.push_str(&format!(
                "\n## Update {} from {} ({}, {}s, {})\n",
                message.update_id,
                message.from_user,
                message.kind,
                message.duration_seconds,
                message.date.format("%Y-%m-%d %H:%M UTC")
            ));

            if let Some(error) = &message.error {
                out.push_str(&format!("\nError: {}\n", error));
            }

            if let Some(transcript) = &message.transcript {
                out.push_str("\nTranscript:\n");
                for line in transcript.lines() {
                    out.push_str(&format!("> {}\n", line));
                }
            }

            if !message.tasks.is_empty() {
                out.push_str("\nTasks:\n");
                for task in &message.tasks {
                    out.push_str(&render_task_line(task));
                }
            }
        }

        out
    }

    /// Short summary for the notification message
    pub fn summary_message(&self) -> String {
        let duration = (self.finished_at - self.started_at).num_seconds().max(0);
        let mut lines = vec![format!(
            "Voice task run: {} message(s), {} task(s) created in {}s",
            self.messages.len(),
            self.tasks_created(),
            duration
        )];

        let failed_messages = self.messages_failed();
        let failed_tasks = self.tasks_failed();
        if failed_messages > 0 || failed_tasks > 0 {
            lines.push(format!(
                "Failures: {} message(s), {} task(s)",
                failed_messages, failed_tasks
            ));
        }
        if self.incomplete {
            lines.push("Run did not finish cleanly, check the processing log".to_string());
        }

        lines.join("\n")
    }
}

fn display_cursor(cursor: Option<i64>) -> String {
    cursor.map_or_else(|| "(none)".to_string(), |c| c.to_string())
}

fn render_task_line(task: &TaskReport) -> String {
    let mut details = vec![format!("priority {}", task.candidate.priority.as_u8())];
    if let Some(due) = task.candidate.due_date {
        details.push(format!("due {}", due));
    }
    if let Some(assignee) = &task.candidate.assignee {
        details.push(format!("assignee {}", assignee));
    }

    let status = match (&task.task_id, &task.error) {
        (Some(id), _) => format!("-> {}", id),
        (None, Some(error)) => format!("-- failed: {}", error),
        (None, None) => "-- not created".to_string(),
    };

    format!(
        "- {} ({}) {}\n",
        task.candidate.title,
        details.join(", "),
        status
    )
}

/// Timestamp fragment used in artifact file names
fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Write the markdown log under `logs_dir`
pub fn write_processing_log(report: &RunReport, logs_dir: &Path) -> std::io::Result<PathBuf> {
    let path = logs_dir.join(format!("processing_log_{}.md", file_stamp(report.started_at)));
    atomic_write(&path, &report.to_markdown())?;
    info!(path = %path.display(), "Wrote processing log");
    Ok(path)
}

/// Write the task payload JSON under `data_dir`, when the run produced tasks
pub fn write_task_payload(report: &RunReport, data_dir: &Path) -> std::io::Result<Option<PathBuf>> {
    if report.tasks_total() == 0 {
        return Ok(None);
    }

    let path = data_dir.join(format!(
        "tasks_to_create_{}.json",
        file_stamp(report.started_at)
    ));
    let content = serde_json::to_string_pretty(report)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    atomic_write(&path, &content)?;
    info!(path = %path.display(), tasks = report.tasks_total(), "Wrote task payload");
    Ok(Some(path))
}

/// Delete files matching `pattern` inside `dir` whose mtime is older than
/// `retention_days`. A zero retention disables cleanup. Returns the number
/// of files removed.
pub fn cleanup_old_files(dir: &Path, pattern: &str, retention_days: u32) -> usize {
    if retention_days == 0 {
        return 0;
    }

    let glob_pattern = dir.join(pattern);
    let Some(glob_str) = glob_pattern.to_str() else {
        return 0;
    };
    let Ok(paths) = glob::glob(glob_str) else {
        warn!(pattern = glob_str, "Invalid cleanup pattern");
        return 0;
    };

    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs(retention_days as u64 * 24 * 3600);

    let mut removed = 0;
    for path in paths.flatten() {
        let is_old = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(|mtime| mtime < cutoff)
            .unwrap_or(false);

        if !is_old {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                info!(path = %path.display(), "Removed expired file");
            }
            Err(err) => warn!(path = %path.display(), error = %err, "Cleanup failed"),
        }
    }

    removed
}
