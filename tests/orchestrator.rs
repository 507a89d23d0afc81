//! End-to-end orchestrator runs over in-memory fakes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use voicetasks::clients::{
    FetchResult, MessageSource, SpeechToText, TaskExtractor, TaskPayload, TaskSink,
};
use voicetasks::config::{Config, ConfigFile};
use voicetasks::domain::{AudioKind, ExtractedTask, Transcript, VoiceMessage};
use voicetasks::error::ClientError;
use voicetasks::run::{Orchestrator, RunOptions};
use voicetasks::state::{MemoryStateStore, StateStore};

fn voice_message(update_id: i64) -> VoiceMessage {
    VoiceMessage {
        update_id,
        file_id: format!("file_{}", update_id),
        from_user: "Ivan".to_string(),
        date: Utc::now(),
        duration_seconds: 15,
        kind: AudioKind::Voice,
        mime_type: "audio/ogg".to_string(),
        is_forwarded: false,
    }
}

fn test_config(data_dir: PathBuf) -> Config {
    config_from(
        r#"{"clickup_list_id": "900", "send_summary_to_telegram": false}"#,
        data_dir,
    )
}

fn config_from(json: &str, data_dir: PathBuf) -> Config {
    let raw: ConfigFile = serde_json::from_str(json).unwrap();
    Config::from_raw(raw, data_dir)
}

struct FakeSource {
    result: FetchResult,
    fail_download_for: Option<String>,
    download_delay: Option<Duration>,
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeSource {
    fn with_messages(messages: Vec<VoiceMessage>, max_update_id: Option<i64>) -> Self {
        Self {
            result: FetchResult {
                messages,
                max_update_id,
            },
            fail_download_for: None,
            download_delay: None,
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn fetch_since(
        &self,
        _cursor: Option<i64>,
        _check_hours: u32,
    ) -> Result<FetchResult, ClientError> {
        Ok(self.result.clone())
    }

    async fn download_audio(&self, file_id: &str) -> Result<Vec<u8>, ClientError> {
        if let Some(delay) = self.download_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_download_for.as_deref() == Some(file_id) {
            return Err(ClientError::Transient("download broke".to_string()));
        }
        Ok(file_id.as_bytes().to_vec())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ClientError> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

struct FakeStt {
    /// File names containing this fragment fail with an auth error when
    /// `fail_fatal`, otherwise with a transient error
    fail_containing: Option<String>,
    fail_fatal: bool,
    delay: Option<Duration>,
}

impl FakeStt {
    fn ok() -> Self {
        Self {
            fail_containing: None,
            fail_fatal: false,
            delay: None,
        }
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe(&self, _audio: Vec<u8>, file_name: &str) -> Result<Transcript, ClientError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(fragment) = &self.fail_containing {
            if file_name.contains(fragment.as_str()) {
                return Err(if self.fail_fatal {
                    ClientError::Auth("bad key".to_string())
                } else {
                    ClientError::Transient("whisper unavailable".to_string())
                });
            }
        }
        Ok(Transcript {
            text: format!("do something about {}", file_name),
            language: "en".to_string(),
        })
    }
}

struct FakeExtractor;

#[async_trait]
impl TaskExtractor for FakeExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedTask>, ClientError> {
        Ok(vec![ExtractedTask {
            title: format!("Task from: {}", text),
            description: text.to_string(),
            due_date: None,
            priority: Some(2),
            assignee: None,
        }])
    }
}

#[derive(Default)]
struct FakeSink {
    created: Mutex<Vec<TaskPayload>>,
    fail_auth: bool,
}

#[async_trait]
impl TaskSink for FakeSink {
    async fn create_task(&self, payload: &TaskPayload) -> Result<String, ClientError> {
        if self.fail_auth {
            return Err(ClientError::Auth("token revoked".to_string()));
        }
        let mut created = self.created.lock().unwrap();
        created.push(payload.clone());
        Ok(format!("task_{}", created.len()))
    }

    async fn create_reminder(
        &self,
        _task_id: &str,
        _remind_at_ms: i64,
        _assignee: Option<i64>,
    ) -> Result<(), ClientError> {
        Ok(())
    }

    async fn member_map(&self) -> Result<HashMap<String, Vec<i64>>, ClientError> {
        Ok(HashMap::new())
    }
}

struct Harness {
    state: Arc<MemoryStateStore>,
    sink: Arc<FakeSink>,
    orchestrator: Orchestrator,
    _temp: tempfile::TempDir,
}

fn harness(source: FakeSource, stt: FakeStt, sink: FakeSink, cursor: Option<i64>) -> Harness {
    harness_with_timeout(source, stt, sink, cursor, None)
}

fn harness_with_timeout(
    source: FakeSource,
    stt: FakeStt,
    sink: FakeSink,
    cursor: Option<i64>,
    timeout_minutes: Option<u32>,
) -> Harness {
    let temp = tempfile::TempDir::new().unwrap();
    let state = Arc::new(MemoryStateStore::with_cursor(cursor));
    let sink = Arc::new(sink);

    let config = match timeout_minutes {
        Some(minutes) => config_from(
            &format!(
                r#"{{"clickup_list_id": "900", "send_summary_to_telegram": false,
                     "run_timeout_minutes": {}}}"#,
                minutes
            ),
            temp.path().to_path_buf(),
        ),
        None => test_config(temp.path().to_path_buf()),
    };

    let orchestrator = Orchestrator::new(
        config,
        Arc::clone(&state) as Arc<dyn StateStore>,
        Arc::new(source),
        Arc::new(stt),
        Arc::new(FakeExtractor),
        Arc::clone(&sink) as Arc<dyn TaskSink>,
    );

    Harness {
        state,
        sink,
        orchestrator,
        _temp: temp,
    }
}

#[tokio::test]
async fn run_creates_tasks_and_advances_cursor() {
    let source = FakeSource::with_messages(vec![voice_message(11), voice_message(12)], Some(14));
    let h = harness(source, FakeStt::ok(), FakeSink::default(), Some(10));

    let report = h.orchestrator.run(RunOptions::default()).await.unwrap();

    assert_eq!(report.messages.len(), 2);
    assert_eq!(report.tasks_created(), 2);
    assert!(!report.incomplete);

    // Cursor lands on the highest fetched update id, which may belong to a
    // non-audio update
    assert_eq!(h.state.cursor(), Some(14));
    assert_eq!(report.cursor_after, Some(14));
    assert_eq!(h.sink.created.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn dry_run_creates_nothing_and_keeps_cursor() {
    let source = FakeSource::with_messages(vec![voice_message(11)], Some(11));
    let h = harness(source, FakeStt::ok(), FakeSink::default(), Some(10));

    let report = h
        .orchestrator
        .run(RunOptions {
            dry_run: true,
            limit: None,
        })
        .await
        .unwrap();

    // The pipeline still runs end to end
    assert_eq!(report.tasks_total(), 1);
    assert_eq!(report.tasks_created(), 0);

    assert!(h.sink.created.lock().unwrap().is_empty());
    assert_eq!(h.state.cursor(), Some(10));
}

#[tokio::test]
async fn rerun_with_no_new_updates_is_idempotent() {
    let source = FakeSource::with_messages(Vec::new(), Some(14));
    let h = harness(source, FakeStt::ok(), FakeSink::default(), Some(14));

    let report = h.orchestrator.run(RunOptions::default()).await.unwrap();

    assert!(report.messages.is_empty());
    assert!(h.sink.created.lock().unwrap().is_empty());
    assert_eq!(h.state.cursor(), Some(14));
}

#[tokio::test]
async fn one_failed_transcription_does_not_sink_the_batch() {
    let source = FakeSource::with_messages(vec![voice_message(11), voice_message(12)], Some(12));
    let stt = FakeStt {
        fail_containing: Some("voice_11".to_string()),
        fail_fatal: false,
        delay: None,
    };
    let h = harness(source, stt, FakeSink::default(), None);

    let report = h.orchestrator.run(RunOptions::default()).await.unwrap();

    assert_eq!(report.messages_failed(), 1);
    assert_eq!(report.tasks_created(), 1);
    assert!(!report.incomplete);

    // Failures are recorded, the cursor still moves on
    assert_eq!(h.state.cursor(), Some(12));
    let failed = &report.messages[0];
    assert_eq!(failed.update_id, 11);
    assert!(failed.error.as_deref().unwrap().contains("transcription failed"));
}

#[tokio::test]
async fn fatal_auth_error_leaves_cursor_alone() {
    let source = FakeSource::with_messages(vec![voice_message(11)], Some(11));
    let h = harness(
        source,
        FakeStt::ok(),
        FakeSink {
            fail_auth: true,
            ..Default::default()
        },
        Some(10),
    );

    let report = h.orchestrator.run(RunOptions::default()).await.unwrap();

    assert!(report.incomplete);
    assert_eq!(report.tasks_created(), 0);
    assert_eq!(h.state.cursor(), Some(10));
    assert_eq!(report.cursor_after, Some(10));
}

#[tokio::test]
async fn fatal_transcription_error_skips_creation() {
    let source = FakeSource::with_messages(vec![voice_message(11), voice_message(12)], Some(12));
    let stt = FakeStt {
        fail_containing: Some("voice_".to_string()),
        fail_fatal: true,
        delay: None,
    };
    let h = harness(source, stt, FakeSink::default(), Some(10));

    let report = h.orchestrator.run(RunOptions::default()).await.unwrap();

    assert!(report.incomplete);
    assert!(h.sink.created.lock().unwrap().is_empty());
    assert_eq!(h.state.cursor(), Some(10));
}

#[tokio::test]
async fn limit_caps_processed_messages() {
    let source = FakeSource::with_messages(
        vec![voice_message(11), voice_message(12), voice_message(13)],
        Some(13),
    );
    let h = harness(source, FakeStt::ok(), FakeSink::default(), Some(10));

    let report = h
        .orchestrator
        .run(RunOptions {
            dry_run: false,
            limit: Some(2),
        })
        .await
        .unwrap();

    assert_eq!(report.messages.len(), 2);
    assert_eq!(report.tasks_created(), 2);

    // The cursor stops at the last processed message so update 13 is
    // fetched again next run instead of being skipped forever
    assert_eq!(h.state.cursor(), Some(12));
    assert_eq!(report.cursor_after, Some(12));
}

#[tokio::test]
async fn deadline_during_processing_is_fatal_and_holds_cursor() {
    tokio::time::pause();

    let mut source = FakeSource::with_messages(vec![voice_message(11)], Some(11));
    source.download_delay = Some(Duration::from_secs(120));
    let h = harness_with_timeout(source, FakeStt::ok(), FakeSink::default(), Some(10), Some(1));

    let report = h.orchestrator.run(RunOptions::default()).await.unwrap();

    // The audio was never transcribed, so nothing is replayable and the
    // message must be fetched again next run
    assert!(report.incomplete);
    assert_eq!(h.state.cursor(), Some(10));
    assert!(h.sink.created.lock().unwrap().is_empty());
    assert!(report.messages[0]
        .error
        .as_deref()
        .unwrap()
        .contains("deadline"));
}

#[tokio::test]
async fn deadline_during_creation_still_advances_cursor() {
    tokio::time::pause();

    let source = FakeSource::with_messages(vec![voice_message(11)], Some(11));
    let stt = FakeStt {
        fail_containing: None,
        fail_fatal: false,
        delay: Some(Duration::from_secs(120)),
    };
    let h = harness_with_timeout(source, stt, FakeSink::default(), Some(10), Some(1));

    let report = h.orchestrator.run(RunOptions::default()).await.unwrap();

    // Extraction finished before the deadline hit, so the candidate is in
    // the payload and recreate-tasks can replay it; the cursor moves on
    assert!(!report.incomplete);
    assert_eq!(h.state.cursor(), Some(11));
    assert!(h.sink.created.lock().unwrap().is_empty());
    assert_eq!(report.tasks_failed(), 1);
    assert!(report.messages[0].tasks[0]
        .error
        .as_deref()
        .unwrap()
        .contains("deadline"));
}

#[tokio::test]
async fn run_writes_log_and_payload_artifacts() {
    let temp = tempfile::TempDir::new().unwrap();
    let state = Arc::new(MemoryStateStore::with_cursor(None));
    let sink = Arc::new(FakeSink::default());
    let source = FakeSource::with_messages(vec![voice_message(11)], Some(11));

    let orchestrator = Orchestrator::new(
        test_config(temp.path().to_path_buf()),
        Arc::clone(&state) as Arc<dyn StateStore>,
        Arc::new(source),
        Arc::new(FakeStt::ok()),
        Arc::new(FakeExtractor),
        sink,
    );

    orchestrator.run(RunOptions::default()).await.unwrap();

    let logs: Vec<_> = std::fs::read_dir(temp.path().join("logs"))
        .unwrap()
        .flatten()
        .collect();
    assert_eq!(logs.len(), 1);
    assert!(logs[0]
        .file_name()
        .to_string_lossy()
        .starts_with("processing_log_"));

    let payloads: Vec<_> = std::fs::read_dir(temp.path())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("tasks_to_create_"))
        .collect();
    assert_eq!(payloads.len(), 1);
}

#[tokio::test]
async fn zero_message_run_still_writes_log() {
    let temp = tempfile::TempDir::new().unwrap();
    let state = Arc::new(MemoryStateStore::with_cursor(Some(14)));
    let source = FakeSource::with_messages(Vec::new(), Some(14));

    let orchestrator = Orchestrator::new(
        test_config(temp.path().to_path_buf()),
        Arc::clone(&state) as Arc<dyn StateStore>,
        Arc::new(source),
        Arc::new(FakeStt::ok()),
        Arc::new(FakeExtractor),
        Arc::new(FakeSink::default()),
    );

    orchestrator.run(RunOptions::default()).await.unwrap();

    // The quiet-hour log with zero counts still lands on disk
    let logs: Vec<_> = std::fs::read_dir(temp.path().join("logs"))
        .unwrap()
        .flatten()
        .collect();
    assert_eq!(logs.len(), 1);

    // Nothing to replay, so no payload file
    let payloads = std::fs::read_dir(temp.path())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("tasks_to_create_"))
        .count();
    assert_eq!(payloads, 0);
}
