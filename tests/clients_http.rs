//! HTTP client behavior against a mock server: pagination offsets, retry
//! on rate limits, error classification.

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voicetasks::clients::clickup::{ClickUpClient, TaskPayload};
use voicetasks::clients::{MessageSource, SpeechToText, TaskSink, TelegramClient};
use voicetasks::clients::OpenAiClient;
use voicetasks::error::ClientError;
use voicetasks::retry::RetryPolicy;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    }
}

fn telegram(server: &MockServer) -> TelegramClient {
    TelegramClient::new("TOKEN".to_string(), "123", fast_retry())
        .unwrap()
        .with_base_url(server.uri())
}

fn clickup(server: &MockServer) -> ClickUpClient {
    ClickUpClient::new("pk_token".to_string(), "900".to_string(), None, fast_retry())
        .with_base_url(server.uri())
}

#[tokio::test]
async fn fetch_since_uses_cursor_offset_and_filters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/botTOKEN/getUpdates"))
        .and(query_param("offset", "11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": [
                {
                    "update_id": 11,
                    "message": {
                        "chat": {"id": 123},
                        "date": 1_900_000_000i64,
                        "from": {"first_name": "Ivan"},
                        "voice": {"file_id": "f1", "duration": 9, "mime_type": "audio/ogg"}
                    }
                },
                {
                    "update_id": 12,
                    "message": {
                        "chat": {"id": 999},
                        "date": 1_900_000_000i64,
                        "voice": {"file_id": "f2", "duration": 3}
                    }
                },
                {
                    "update_id": 13,
                    "message": {"chat": {"id": 123}, "date": 1_900_000_000i64}
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = telegram(&server).fetch_since(Some(10), 1).await.unwrap();

    // Only the in-chat voice message survives, but the cursor covers
    // everything that was fetched
    assert_eq!(result.messages.len(), 1);
    assert_eq!(result.messages[0].update_id, 11);
    assert_eq!(result.max_update_id, Some(13));
}

#[tokio::test]
async fn fetch_since_surfaces_api_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/botTOKEN/getUpdates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": false,
            "description": "Unauthorized"
        })))
        .mount(&server)
        .await;

    let err = telegram(&server).fetch_since(None, 1).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
}

#[tokio::test]
async fn download_audio_resolves_file_path() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/botTOKEN/getFile"))
        .and(query_param("file_id", "f1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {"file_path": "voice/file_1.oga"}
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/file/botTOKEN/voice/file_1.oga"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"OggS...".to_vec()))
        .mount(&server)
        .await;

    let audio = telegram(&server).download_audio("f1").await.unwrap();
    assert_eq!(audio, b"OggS...".to_vec());
}

#[tokio::test]
async fn create_task_retries_rate_limit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/list/900/task"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_string("slow down"),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/list/900/task"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "abc123"})))
        .expect(1)
        .mount(&server)
        .await;

    let payload = TaskPayload {
        name: "Review report".to_string(),
        description: String::new(),
        priority: 3,
        due_date: None,
        assignees: Vec::new(),
    };

    let task_id = clickup(&server).create_task(&payload).await.unwrap();
    assert_eq!(task_id, "abc123");
}

#[tokio::test]
async fn create_task_auth_failure_is_fatal_and_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/list/900/task"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .expect(1)
        .mount(&server)
        .await;

    let payload = TaskPayload {
        name: "X".to_string(),
        description: String::new(),
        priority: 3,
        due_date: None,
        assignees: Vec::new(),
    };

    let err = clickup(&server).create_task(&payload).await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn member_map_failure_degrades_to_empty() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/list/900"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such list"))
        .mount(&server)
        .await;

    let map = clickup(&server).member_map().await.unwrap();
    assert!(map.is_empty());
}

#[tokio::test]
async fn member_map_parses_users() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/list/900"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "members": [
                {"user": {"id": 7, "username": "Ivan", "email": "ivan@x.io"}}
            ]
        })))
        .mount(&server)
        .await;

    let map = clickup(&server).member_map().await.unwrap();
    assert_eq!(map["ivan"], vec![7]);
    assert_eq!(map["ivan@x.io"], vec![7]);
}

#[tokio::test]
async fn transcribe_returns_trimmed_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "  нужно проверить отчет  ",
            "language": "russian"
        })))
        .mount(&server)
        .await;

    let client = OpenAiClient::new("sk-test".to_string(), Some("ru".to_string()), fast_retry())
        .with_base_url(server.uri());

    let transcript = client
        .transcribe(b"OggS...".to_vec(), "voice_11.ogg")
        .await
        .unwrap();

    assert_eq!(transcript.text, "нужно проверить отчет");
    assert_eq!(transcript.language, "russian");
}

#[tokio::test]
async fn transcribe_retries_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiClient::new("sk-test".to_string(), None, fast_retry())
        .with_base_url(server.uri());

    let transcript = client.transcribe(vec![1, 2, 3], "a.ogg").await.unwrap();
    assert_eq!(transcript.text, "ok");
}
