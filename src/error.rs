//! Error taxonomy for the three external HTTP clients.
//!
//! The split drives the propagation policy: auth errors abort the run,
//! transient and rate-limit errors are retried by [`crate::retry::RetryPolicy`],
//! and validation errors skip the offending item.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by the Telegram, OpenAI and ClickUp clients
#[derive(Debug, Error)]
pub enum ClientError {
    /// Credentials rejected. Fatal: retrying cannot help.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Timeout, connection failure or 5xx. Retried with backoff.
    #[error("transient network error: {0}")]
    Transient(String),

    /// HTTP 429. Retried honoring the Retry-After hint when present.
    #[error("rate limited{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Upstream answered but the payload does not match the contract.
    /// Skipped per item, never retried.
    #[error("invalid upstream response: {0}")]
    Validation(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl ClientError {
    /// Fatal errors abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Whether the retry policy should attempt this call again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// Retry-After hint, if the upstream provided one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP status into the taxonomy
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Self::Auth(format!("{}: {}", status, body))
            }
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited { retry_after },
            StatusCode::REQUEST_TIMEOUT => Self::Transient(format!("{}: {}", status, body)),
            s if s.is_server_error() => Self::Transient(format!("{}: {}", status, body)),
            s => Self::Validation(format!("{}: {}", s, body)),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        // Body decode failures are contract violations; everything else
        // (connect, timeout, dns) is worth retrying.
        if err.is_decode() {
            Self::Validation(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

/// Failure to durably write the cursor, report or task payload.
///
/// Processing may have succeeded, but the run must be reported incomplete:
/// a lost cursor means reprocessing on the next invocation.
#[derive(Debug, Error)]
#[error("failed to persist {what}: {source}")]
pub struct PersistenceError {
    pub what: String,
    #[source]
    pub source: std::io::Error,
}

impl PersistenceError {
    pub fn new(what: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            what: what.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let auth = ClientError::from_status(StatusCode::UNAUTHORIZED, None, "no".into());
        assert!(auth.is_fatal());
        assert!(!auth.is_retryable());

        let limited = ClientError::from_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(2)),
            String::new(),
        );
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));

        let server = ClientError::from_status(StatusCode::BAD_GATEWAY, None, "oops".into());
        assert!(server.is_retryable());
        assert!(!server.is_fatal());

        let bad = ClientError::from_status(StatusCode::UNPROCESSABLE_ENTITY, None, "x".into());
        assert!(matches!(bad, ClientError::Validation(_)));
        assert!(!bad.is_retryable());
    }
}
