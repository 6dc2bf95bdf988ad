//! Shared helpers for integration tests against a wiremock server.
//!
//! The blocking client must not be created or dropped on an async worker, so every
//! test builds and uses it inside [`blocking`].

#![allow(dead_code)]

use std::time::Duration;

use amplitude_data::{Client, Credentials, PollPolicy, Region, RetryPolicy};
use wiremock::{MockServer, Request};

pub const KEY: &str = "test-key";
pub const SECRET: &str = "test-secret";

/// Client pointed at `uri` with zero backoff and millisecond poll intervals.
pub fn test_client(uri: &str) -> Client {
    Client::new(Credentials::new(KEY, SECRET), Region::Eu)
        .expect("client should build")
        .with_base_url(uri)
        .with_progress(false)
        .with_retry_policy(RetryPolicy::new(5, Duration::ZERO, Duration::ZERO))
        .with_poll_policy(fast_polls())
}

pub fn fast_polls() -> PollPolicy {
    PollPolicy {
        pending_interval: Duration::from_millis(1),
        error_interval: Duration::from_millis(1),
        max_error_polls: 5,
        max_wait: Some(Duration::from_secs(10)),
    }
}

/// Runs `f` on a blocking thread and returns its result.
pub async fn blocking<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking task panicked")
}

pub async fn requests_to(server: &MockServer, path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == path)
        .collect()
}
