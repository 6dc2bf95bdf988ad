use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::util::excerpt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by [`Client`](crate::Client) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Non-2xx response that was not retried, or still failing after the last retry.
    #[error("API request failed: HTTP {status} for url ({url}){}", describe_body(.body))]
    Http {
        status: StatusCode,
        url: String,
        body: String,
    },

    /// Connection, TLS or timeout failure after the last retry.
    #[error("could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The status endpoint reported that the job cannot complete.
    #[error("job {request_id} failed (HTTP {status}){}", describe_body(.body))]
    JobFailed {
        request_id: String,
        status: StatusCode,
        body: String,
    },

    /// Polling ran past its deadline or its error budget.
    #[error("gave up waiting for job {request_id} after {waited:.0?} ({error_polls} failed polls)")]
    PollTimeout {
        request_id: String,
        waited: Duration,
        error_polls: u32,
    },

    #[error("no data has been collected for the range {start}..{end}")]
    NoData { start: String, end: String },

    #[error("export for {start}..{end} exceeds the 4GB limit; request a shorter range")]
    ExportTooLarge { start: String, end: String },

    #[error("export for {start}..{end} timed out server-side; request a shorter range")]
    ExportTimeout { start: String, end: String },

    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the response body failed mid-transfer.
    #[error("response stream failed after {written} byte(s): {source}")]
    Stream {
        written: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("download to {path} ended after {written} byte(s), expected {expected}")]
    Incomplete {
        path: PathBuf,
        expected: u64,
        written: u64,
    },

    #[error("failed to parse API JSON (url={url}): {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid proxy url {url}: {source}")]
    InvalidProxy {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl Error {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http { status, .. } | Error::JobFailed { status, .. } => Some(*status),
            Error::NoData { .. } => Some(StatusCode::NOT_FOUND),
            Error::ExportTooLarge { .. } => Some(StatusCode::BAD_REQUEST),
            Error::ExportTimeout { .. } => Some(StatusCode::GATEWAY_TIMEOUT),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

// Amplitude answers with either {"error": "..."} or {"error": {"message": ...}}.
#[derive(Debug, serde::Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

fn describe_body(body: &str) -> String {
    if body.trim().is_empty() {
        return String::new();
    }
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|e| {
            let nested = e.error.and_then(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string),
                _ => None,
            });
            nested.or(e.message)
        })
        .unwrap_or_else(|| excerpt(body, 300));
    format!("\n{}", message)
}
