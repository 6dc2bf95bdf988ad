//! Cohort export flow: submit, poll, download.

mod support;

use std::time::{Duration, Instant};

use amplitude_data::{CancelToken, CohortRequest, Error, PollPolicy, RetryPolicy};
use reqwest::StatusCode;
use serde_json::json;
use support::{blocking, fast_polls, requests_to, test_client};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SUBMIT: &str = "/api/5/cohorts/request/cohort-1";
const STATUS: &str = "/api/5/cohorts/request-status/abc123";
const FILE: &str = "/api/5/cohorts/request/abc123/file";

async fn mount_submit(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(SUBMIT))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"request_id": "abc123", "cohort_id": "cohort-1"})),
        )
        .mount(server)
        .await;
}

/// Answers the status endpoint with `pending` 202s, then 200.
async fn mount_status(server: &MockServer, pending: u64) {
    if pending > 0 {
        Mock::given(method("GET"))
            .and(path(STATUS))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(json!({"request_id": "abc123", "async_status": "JOB INPROGRESS"})),
            )
            .up_to_n_times(pending)
            .with_priority(1)
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(STATUS))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"request_id": "abc123", "async_status": "JOB COMPLETED"})),
        )
        .mount(server)
        .await;
}

async fn mount_file(server: &MockServer, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(FILE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submit_poll_download_writes_exact_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SUBMIT))
        .and(query_param("props", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "abc123"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_status(&server, 1).await;
    mount_file(&server, b"0123456789").await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let target = dir.path().join("data/cohortdata.csv");
    let uri = server.uri();
    let dest = target.clone();
    let report = blocking(move || {
        let request = CohortRequest::new("cohort-1").with_properties(true);
        test_client(&uri).download_cohort(&request, &dest)
    })
    .await
    .expect("cohort export should succeed");

    assert_eq!(report.path, target);
    assert_eq!(report.request_id, "abc123");
    assert_eq!(report.bytes, 10);
    assert_eq!(report.pending_polls, 1);
    assert_eq!(report.error_polls, 0);
    assert_eq!(std::fs::read(&target).unwrap(), b"0123456789");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_two_pending_polls_before_ready() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    mount_status(&server, 2).await;
    mount_file(&server, b"amplitude_id\n1\n2\n").await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let report = blocking(move || {
        test_client(&uri).download_cohort(&CohortRequest::new("cohort-1"), &target)
    })
    .await
    .unwrap();

    assert_eq!(report.pending_polls, 2);
    assert_eq!(requests_to(&server, STATUS).await.len(), 3);
    assert_eq!(requests_to(&server, FILE).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ready_on_first_poll_downloads_without_waiting() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    mount_status(&server, 0).await;
    mount_file(&server, b"x").await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let report = blocking(move || {
        // A long pending interval would make any accidental sleep visible.
        test_client(&uri)
            .with_poll_policy(PollPolicy {
                pending_interval: Duration::from_secs(30),
                ..fast_polls()
            })
            .download_cohort(&CohortRequest::new("cohort-1"), &target)
    })
    .await
    .unwrap();

    assert_eq!(report.pending_polls, 0);
    assert_eq!(requests_to(&server, STATUS).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_errors_while_polling_are_retried() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path(STATUS))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_status(&server, 0).await;
    mount_file(&server, b"ok").await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let report = blocking(move || {
        test_client(&uri).download_cohort(&CohortRequest::new("cohort-1"), &target)
    })
    .await
    .unwrap();

    assert_eq!(report.error_polls, 2);
    assert_eq!(report.pending_polls, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_persistent_poll_errors_give_up() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path(STATUS))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let dest = target.clone();
    let err = blocking(move || {
        test_client(&uri)
            .with_poll_policy(PollPolicy {
                max_error_polls: 3,
                ..fast_polls()
            })
            .download_cohort(&CohortRequest::new("cohort-1"), &dest)
    })
    .await
    .unwrap_err();

    match err {
        Error::PollTimeout {
            request_id,
            error_polls,
            ..
        } => {
            assert_eq!(request_id, "abc123");
            assert_eq!(error_polls, 4);
        }
        other => panic!("expected poll timeout, got {other}"),
    }
    assert_eq!(requests_to(&server, STATUS).await.len(), 4);
    assert!(requests_to(&server, FILE).await.is_empty());
    assert!(!target.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_request_id_fails_the_job() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path(STATUS))
        .respond_with(ResponseTemplate::new(404).set_body_string("request not found"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let err = blocking(move || {
        test_client(&uri).download_cohort(&CohortRequest::new("cohort-1"), &target)
    })
    .await
    .unwrap_err();

    assert!(
        matches!(&err, Error::JobFailed { status, .. } if *status == StatusCode::NOT_FOUND),
        "{err:?}"
    );
    assert_eq!(requests_to(&server, STATUS).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_async_status_fails_the_job() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path(STATUS))
        .respond_with(
            ResponseTemplate::new(202)
                .set_body_json(json!({"request_id": "abc123", "async_status": "JOB FAILED"})),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let err = blocking(move || {
        test_client(&uri).download_cohort(&CohortRequest::new("cohort-1"), &target)
    })
    .await
    .unwrap_err();

    assert!(matches!(err, Error::JobFailed { .. }), "{err:?}");
    assert!(err.to_string().contains("JOB FAILED"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submission_error_is_returned_without_polling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SUBMIT))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let err = blocking(move || {
        test_client(&uri).download_cohort(&CohortRequest::new("cohort-1"), &target)
    })
    .await
    .unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    assert!(requests_to(&server, STATUS).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deadline_bounds_a_job_that_never_finishes() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path(STATUS))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"async_status": "JOB INPROGRESS"})))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let err = blocking(move || {
        test_client(&uri)
            .with_poll_policy(PollPolicy {
                pending_interval: Duration::from_millis(20),
                max_wait: Some(Duration::from_millis(100)),
                ..fast_polls()
            })
            .download_cohort(&CohortRequest::new("cohort-1"), &target)
    })
    .await
    .unwrap_err();

    assert!(matches!(err, Error::PollTimeout { error_polls: 0, .. }), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_interrupts_pending_wait_and_client_stays_usable() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path(STATUS))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/3/chart/c1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [7]})))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let started = Instant::now();
    let (err, same, clone) = blocking(move || {
        let client = test_client(&uri).with_poll_policy(PollPolicy {
            pending_interval: Duration::from_secs(60),
            ..fast_polls()
        });
        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            remote.cancel();
        });
        let result = client.download_cohort_with(&CohortRequest::new("cohort-1"), &target, &token);
        canceller.join().unwrap();
        (result, client.chart("c1"), client.clone().chart("c1"))
    })
    .await;

    let err = err.unwrap_err();
    assert!(err.is_cancelled(), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(same.unwrap()["data"][0], 7);
    assert_eq!(clone.unwrap()["data"][0], 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transport_backoff_respects_poll_deadline() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path(STATUS))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let started = Instant::now();
    let err = blocking(move || {
        // Unbounded, the first status poll alone would back off for 7.5s.
        test_client(&uri)
            .with_retry_policy(RetryPolicy::new(
                5,
                Duration::from_millis(500),
                Duration::from_secs(60),
            ))
            .with_poll_policy(PollPolicy {
                error_interval: Duration::from_millis(20),
                max_error_polls: 1000,
                max_wait: Some(Duration::from_millis(300)),
                ..fast_polls()
            })
            .download_cohort(&CohortRequest::new("cohort-1"), &target)
    })
    .await
    .unwrap_err();

    assert!(matches!(err, Error::PollTimeout { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pending_poll_with_non_json_body_keeps_waiting() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path(STATUS))
        .respond_with(ResponseTemplate::new(202).set_body_string("<html>still working</html>"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_status(&server, 0).await;
    mount_file(&server, b"id\n").await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let report = blocking(move || {
        test_client(&uri).download_cohort(&CohortRequest::new("cohort-1"), &target)
    })
    .await
    .unwrap();

    assert_eq!(report.pending_polls, 1);
    assert_eq!(report.error_polls, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cohort_id_is_percent_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/5/cohorts/request/team%2Fq1%20%232"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "abc123"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_status(&server, 0).await;
    mount_file(&server, b"x").await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("cohort.csv");
    let uri = server.uri();
    let report = blocking(move || {
        test_client(&uri).download_cohort(&CohortRequest::new("team/q1 #2"), &target)
    })
    .await
    .unwrap();

    assert_eq!(report.request_id, "abc123");
    assert_eq!(report.bytes, 1);
}
