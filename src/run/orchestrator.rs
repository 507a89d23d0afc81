//! Run orchestration: fetch, transcribe, extract, create, persist.
//!
//! One run is a bounded pipeline. Downloads and OpenAI calls fan out over
//! small worker pools; task creation stays serialized in arrival order so
//! the tracker sees tasks in the order people spoke them. Per-item failures
//! are recorded and skipped, fatal errors stop the run without advancing
//! the cursor.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::assignees::{prepare_alias_map, prepare_assignee_map, resolve_assignee_ids};
use crate::clients::{MessageSource, SpeechToText, TaskExtractor, TaskSink};
use crate::config::Config;
use crate::domain::{ExtractedTask, Priority, TaskCandidate, Transcript, VoiceMessage};
use crate::duedate::{normalize_due_date, now_in_offset, to_epoch_millis};
use crate::run::report::{
    cleanup_old_files, write_processing_log, write_task_payload, MessageReport, RunReport,
    TaskReport,
};
use crate::state::{ProcessorState, StateStore};

/// Per-run options from the CLI
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Full pipeline except task creation and cursor persistence
    pub dry_run: bool,

    /// Process at most this many messages
    pub limit: Option<usize>,
}

/// Wall-clock budget for the whole run
#[derive(Debug, Clone, Copy)]
struct Deadline(tokio::time::Instant);

impl Deadline {
    fn after_minutes(minutes: u32) -> Self {
        Self(tokio::time::Instant::now() + std::time::Duration::from_secs(minutes as u64 * 60))
    }

    fn expired(self) -> bool {
        tokio::time::Instant::now() >= self.0
    }
}

/// One message after the download/transcribe/extract stages
struct ProcessedMessage {
    message: VoiceMessage,
    transcript: Option<Transcript>,
    extracted: Vec<ExtractedTask>,
    error: Option<String>,
    fatal: bool,
}

impl ProcessedMessage {
    fn failed(message: VoiceMessage, error: impl Into<String>, fatal: bool) -> Self {
        Self {
            message,
            transcript: None,
            extracted: Vec::new(),
            error: Some(error.into()),
            fatal,
        }
    }
}

/// Drives one end-to-end run over trait objects so every stage can be
/// faked in tests.
pub struct Orchestrator {
    config: Config,
    state: Arc<dyn StateStore>,
    source: Arc<dyn MessageSource>,
    transcriber: Arc<dyn SpeechToText>,
    extractor: Arc<dyn TaskExtractor>,
    sink: Arc<dyn TaskSink>,
    /// Chat for the run summary; `None` disables the summary message
    summary_chat: Option<String>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        state: Arc<dyn StateStore>,
        source: Arc<dyn MessageSource>,
        transcriber: Arc<dyn SpeechToText>,
        extractor: Arc<dyn TaskExtractor>,
        sink: Arc<dyn TaskSink>,
    ) -> Self {
        Self {
            config,
            state,
            source,
            transcriber,
            extractor,
            sink,
            summary_chat: None,
        }
    }

    pub fn with_summary_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.summary_chat = Some(chat_id.into());
        self
    }

    /// Execute one run. Per-item failures land in the report; `incomplete`
    /// is set when the run cannot be trusted to have finished (fatal error,
    /// deadline, or a failed persistence write).
    pub async fn run(&self, options: RunOptions) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4();
        let started_at = Utc::now();
        let deadline = Deadline::after_minutes(self.config.run_timeout_minutes);

        let cursor = self.state.load().await?.last_update_id;
        info!(%run_id, cursor = ?cursor, dry_run = options.dry_run, "Starting run");

        let fetched = self
            .source
            .fetch_since(cursor, self.config.telegram_check_hours)
            .await?;

        let mut messages = fetched.messages;
        let mut cursor_target = fetched.max_update_id;
        if let Some(limit) = options.limit {
            if messages.len() > limit {
                messages.truncate(limit);
                // Messages beyond the limit were never processed and must
                // be re-fetched next run, so the cursor stops at the last
                // one we kept.
                cursor_target = messages.iter().map(|m| m.update_id).max().or(cursor);
            }
        }
        info!(
            messages = messages.len(),
            max_update_id = ?fetched.max_update_id,
            "Fetched updates"
        );

        let processed = self.process_messages(messages, deadline).await;
        let fatal = processed.iter().any(|p| p.fatal);

        let (message_reports, creation_fatal) = self.create_tasks(processed, options, fatal, deadline).await;

        let mut report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: options.dry_run,
            cursor_before: cursor,
            cursor_after: cursor,
            incomplete: fatal || creation_fatal,
            messages: message_reports,
        };

        // The cursor moves to the highest processed update id even when
        // some items failed: failures are durably recorded in the payload
        // file and can be replayed, while a stale cursor would recreate
        // every successful task on the next run. A fatal error leaves it
        // alone, and the cursor is only written once the report and payload
        // are safely on disk.
        let advance = !options.dry_run && !report.incomplete && cursor_target != cursor;
        if advance {
            report.cursor_after = cursor_target;
        }
        report.finished_at = Utc::now();

        let artifacts_ok = self.write_artifacts(&report);
        if advance && !artifacts_ok {
            report.cursor_after = cursor;
            report.incomplete = true;
        } else if advance {
            let next = ProcessorState {
                last_update_id: cursor_target,
            };
            if let Err(err) = self.state.save(&next).await {
                error!(error = %err, "Failed to persist cursor, run is incomplete");
                report.cursor_after = cursor;
                report.incomplete = true;
                // Best effort: the already-written log claims the new cursor
                self.write_artifacts(&report);
            }
        }

        self.cleanup();
        self.send_summary(&report, options).await;

        info!(
            messages = report.messages.len(),
            tasks_created = report.tasks_created(),
            tasks_failed = report.tasks_failed(),
            incomplete = report.incomplete,
            "Run finished"
        );

        Ok(report)
    }

    /// Fan messages out over the download and OpenAI worker pools,
    /// preserving arrival order in the result.
    async fn process_messages(
        &self,
        messages: Vec<VoiceMessage>,
        deadline: Deadline,
    ) -> Vec<ProcessedMessage> {
        let originals = messages.clone();
        let download_sem = Arc::new(Semaphore::new(self.config.download_max_workers));
        let openai_sem = Arc::new(Semaphore::new(self.config.openai_max_workers));

        let mut join_set = JoinSet::new();
        for (idx, message) in messages.into_iter().enumerate() {
            let source = Arc::clone(&self.source);
            let transcriber = Arc::clone(&self.transcriber);
            let extractor = Arc::clone(&self.extractor);
            let download_sem = Arc::clone(&download_sem);
            let openai_sem = Arc::clone(&openai_sem);

            join_set.spawn(async move {
                let processed = process_one(
                    message,
                    source,
                    transcriber,
                    extractor,
                    download_sem,
                    openai_sem,
                    deadline,
                )
                .await;
                (idx, processed)
            });
        }

        let mut slots: Vec<Option<ProcessedMessage>> =
            (0..originals.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, processed)) => slots[idx] = Some(processed),
                Err(err) => error!(error = %err, "Message worker panicked"),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    ProcessedMessage::failed(originals[idx].clone(), "worker panicked", false)
                })
            })
            .collect()
    }

    /// Validate candidates and create them serially, in arrival order.
    async fn create_tasks(
        &self,
        processed: Vec<ProcessedMessage>,
        options: RunOptions,
        skip_creation: bool,
        deadline: Deadline,
    ) -> (Vec<MessageReport>, bool) {
        let now = now_in_offset(self.config.utc_offset_hours);

        // No candidates, no need to touch the member endpoint
        let needs_assignees = processed.iter().any(|p| !p.extracted.is_empty());
        let (assignee_map, alias_map) = if needs_assignees {
            self.build_assignee_maps().await
        } else {
            (HashMap::new(), HashMap::new())
        };

        let mut reports = Vec::with_capacity(processed.len());
        let mut fatal = skip_creation;
        // A deadline hit here only stops further creation: everything
        // extracted is already in the payload and can be replayed, so the
        // cursor may still advance.
        let mut expired = false;

        for item in processed {
            let mut report = MessageReport {
                update_id: item.message.update_id,
                from_user: item.message.from_user.clone(),
                date: item.message.date,
                kind: item.message.kind,
                duration_seconds: item.message.duration_seconds,
                transcript: self.stored_transcript(item.transcript.as_ref()),
                error: item.error.clone(),
                tasks: Vec::new(),
            };

            for extracted in item.extracted {
                let Some(candidate) = validate_task(
                    extracted,
                    self.config.default_priority,
                    now,
                    &assignee_map,
                    &alias_map,
                ) else {
                    continue;
                };

                let task_report = if options.dry_run {
                    TaskReport {
                        candidate,
                        task_id: None,
                        created_at: None,
                        error: None,
                    }
                } else if fatal {
                    TaskReport {
                        candidate,
                        task_id: None,
                        created_at: None,
                        error: Some("not attempted".to_string()),
                    }
                } else if expired || deadline.expired() {
                    if !expired {
                        expired = true;
                        warn!("Run deadline exceeded, remaining tasks not created");
                    }
                    TaskReport {
                        candidate,
                        task_id: None,
                        created_at: None,
                        error: Some("run deadline exceeded".to_string()),
                    }
                } else {
                    self.create_one(candidate, &mut fatal).await
                };

                report.tasks.push(task_report);
            }

            reports.push(report);
        }

        (reports, fatal)
    }

    async fn create_one(&self, candidate: TaskCandidate, fatal: &mut bool) -> TaskReport {
        let payload =
            crate::clients::clickup::build_task_payload(&candidate, self.config.utc_offset_hours);

        match self.sink.create_task(&payload).await {
            Ok(task_id) => {
                info!(task_id = %task_id, title = %candidate.title, "Created task");
                self.maybe_create_reminder(&task_id, &candidate).await;
                TaskReport {
                    candidate,
                    task_id: Some(task_id),
                    created_at: Some(Utc::now()),
                    error: None,
                }
            }
            Err(err) => {
                if err.is_fatal() {
                    *fatal = true;
                    error!(error = %err, "Fatal error creating task, stopping run");
                } else {
                    warn!(title = %candidate.title, error = %err, "Failed to create task");
                }
                TaskReport {
                    candidate,
                    task_id: None,
                    created_at: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Reminder a couple hours before the due date. Failures never fail
    /// the task or the run.
    async fn maybe_create_reminder(&self, task_id: &str, candidate: &TaskCandidate) {
        if !self.config.reminders_enabled() {
            return;
        }
        let Some(due) = candidate.due_date else {
            return;
        };

        let due_ms = to_epoch_millis(due, self.config.utc_offset_hours);
        let remind_at = due_ms - self.config.reminder_offset_hours as i64 * 3_600_000;
        if remind_at <= Utc::now().timestamp_millis() {
            return;
        }
        let assignee = candidate.assignee_ids.first().copied();

        if let Err(err) = self.sink.create_reminder(task_id, remind_at, assignee).await {
            warn!(task_id, error = %err, "Failed to create reminder");
        }
    }

    /// Remote member map with config overrides layered on top
    async fn build_assignee_maps(
        &self,
    ) -> (HashMap<String, Vec<i64>>, HashMap<String, String>) {
        let mut assignee_map = match self.sink.member_map().await {
            Ok(map) => map,
            Err(err) => {
                warn!(error = %err, "Member map unavailable");
                HashMap::new()
            }
        };
        assignee_map.extend(prepare_assignee_map(&self.config.assignee_map));

        (assignee_map, prepare_alias_map(&self.config.assignee_aliases))
    }

    fn stored_transcript(&self, transcript: Option<&Transcript>) -> Option<String> {
        if !self.config.store_transcriptions {
            return None;
        }
        transcript.map(|t| truncate_chars(&t.text, self.config.transcription_max_chars))
    }

    // A log is written for every run, zero-message ones included; the
    // payload file is skipped when there is nothing to replay.
    fn write_artifacts(&self, report: &RunReport) -> bool {
        let mut ok = true;
        if let Err(err) = write_processing_log(report, &self.config.logs_dir()) {
            warn!(error = %err, "Failed to write processing log");
            ok = false;
        }
        if let Err(err) = write_task_payload(report, &self.config.data_dir) {
            warn!(error = %err, "Failed to write task payload");
            ok = false;
        }
        ok
    }

    fn cleanup(&self) {
        cleanup_old_files(
            &self.config.logs_dir(),
            "processing_log_*.md",
            self.config.log_retention_days,
        );
        cleanup_old_files(
            &self.config.data_dir,
            "tasks_to_create_*.json",
            self.config.tasks_retention_days,
        );
    }

    async fn send_summary(&self, report: &RunReport, options: RunOptions) {
        if options.dry_run || !self.config.send_summary_to_telegram {
            return;
        }
        if report.messages.is_empty() {
            return;
        }
        let Some(chat) = self.summary_chat.as_ref() else {
            return;
        };

        let chat = if self.config.summary_chat_id.is_empty() {
            chat.clone()
        } else {
            self.config.summary_chat_id.clone()
        };

        if let Err(err) = self.source.send_message(&chat, &report.summary_message()).await {
            warn!(error = %err, "Failed to send run summary");
        }
    }
}

async fn process_one(
    message: VoiceMessage,
    source: Arc<dyn MessageSource>,
    transcriber: Arc<dyn SpeechToText>,
    extractor: Arc<dyn TaskExtractor>,
    download_sem: Arc<Semaphore>,
    openai_sem: Arc<Semaphore>,
    deadline: Deadline,
) -> ProcessedMessage {
    // A deadline hit before extraction is not replayable (the audio was
    // never turned into candidates), so it blocks the cursor like a fatal
    // error does.
    if deadline.expired() {
        return ProcessedMessage::failed(message, "run deadline exceeded", true);
    }

    let audio = {
        let _permit = download_sem.acquire().await.expect("semaphore closed");
        match source.download_audio(&message.file_id).await {
            Ok(audio) => audio,
            Err(err) => {
                let fatal = err.is_fatal();
                return ProcessedMessage::failed(
                    message,
                    format!("download failed: {}", err),
                    fatal,
                );
            }
        }
    };

    if deadline.expired() {
        return ProcessedMessage::failed(message, "run deadline exceeded", true);
    }

    let _permit = openai_sem.acquire().await.expect("semaphore closed");

    let file_name = format!("voice_{}{}", message.update_id, message.file_suffix());
    let transcript = match transcriber.transcribe(audio, &file_name).await {
        Ok(transcript) => transcript,
        Err(err) => {
            let fatal = err.is_fatal();
            return ProcessedMessage::failed(
                message,
                format!("transcription failed: {}", err),
                fatal,
            );
        }
    };

    if transcript.text.is_empty() {
        return ProcessedMessage {
            message,
            transcript: Some(transcript),
            extracted: Vec::new(),
            error: None,
            fatal: false,
        };
    }

    match extractor.extract(&transcript.text).await {
        Ok(extracted) => ProcessedMessage {
            message,
            transcript: Some(transcript),
            extracted,
            error: None,
            fatal: false,
        },
        Err(err) => {
            let fatal = err.is_fatal();
            let mut failed =
                ProcessedMessage::failed(message, format!("extraction failed: {}", err), fatal);
            failed.transcript = Some(transcript);
            failed
        }
    }
}

/// Turn a raw extracted task into a candidate ready for creation.
/// Returns `None` for tasks with an empty title.
fn validate_task(
    task: ExtractedTask,
    default_priority: Priority,
    now: DateTime<FixedOffset>,
    assignee_map: &HashMap<String, Vec<i64>>,
    alias_map: &HashMap<String, String>,
) -> Option<TaskCandidate> {
    let title = task.title.trim().to_string();
    if title.is_empty() {
        warn!("Dropping extracted task with empty title");
        return None;
    }

    let due_date = task
        .due_date
        .as_deref()
        .and_then(|raw| normalize_due_date(raw, now));

    let assignee = task
        .assignee
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let assignee_ids = assignee
        .as_deref()
        .map(|a| resolve_assignee_ids(a, assignee_map, alias_map))
        .unwrap_or_default();

    Some(TaskCandidate {
        title,
        description: task.description.trim().to_string(),
        due_date,
        priority: Priority::from_raw(task.priority, default_priority),
        assignee,
        assignee_ids,
    })
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}…", truncated)
}
