//! Cohort export: submit a request, poll its status, then stream the CSV to disk.

use reqwest::blocking::Response;
use reqwest::{Method, StatusCode};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use urlencoding::encode;

use crate::cancel::CancelToken;
use crate::download::{ProgressSink, download, expected_length};
use crate::error::{Error, Result};
use crate::transport::{Retry, Transport};
use crate::util::excerpt;

/// Timing and bounds of the status-polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait after a poll reporting the job is still running.
    pub pending_interval: Duration,
    /// Wait after a poll that failed with an unexpected status.
    pub error_interval: Duration,
    /// Consecutive failed polls tolerated before giving up.
    pub max_error_polls: u32,
    /// Upper bound on the whole wait, measured from the first status poll.
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            pending_interval: Duration::from_secs(5),
            error_interval: Duration::from_secs(10),
            max_error_polls: 30,
            max_wait: Some(Duration::from_secs(2 * 60 * 60)),
        }
    }
}

/// A cohort to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortRequest {
    pub cohort_id: String,
    /// Export user properties along with Amplitude ids (`props=1`).
    pub include_properties: bool,
}

impl CohortRequest {
    pub fn new(cohort_id: impl Into<String>) -> Self {
        Self {
            cohort_id: cohort_id.into(),
            include_properties: false,
        }
    }

    pub fn with_properties(mut self, include: bool) -> Self {
        self.include_properties = include;
        self
    }
}

/// Server-assigned id of a submitted cohort request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JobHandle(String);

impl JobHandle {
    fn request_id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobStatus {
    Pending,
    Ready,
    Failed,
}

/// Outcome of a completed cohort export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// Request id assigned by the server on submission.
    pub request_id: String,
    pub path: PathBuf,
    pub bytes: u64,
    /// Polls answered with "still processing".
    pub pending_polls: u32,
    /// Polls that failed and were retried.
    pub error_polls: u32,
}

#[derive(Debug, serde::Deserialize)]
struct SubmitReply {
    request_id: String,
    #[serde(default)]
    cohort_id: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct StatusReply {
    #[serde(default)]
    async_status: Option<String>,
}

/// Maps a status poll to a job state; `None` means the poll itself failed.
///
/// 200 is ready and 202 is pending. A 4xx answer (unknown request id, revoked
/// credentials) or an `async_status` mentioning failure ends the job. Anything
/// else is treated as a failed poll and retried.
pub(crate) fn classify(status: StatusCode, async_status: Option<&str>) -> Option<JobStatus> {
    if async_status.is_some_and(|s| s.to_ascii_uppercase().contains("FAIL")) {
        return Some(JobStatus::Failed);
    }
    match status {
        StatusCode::OK => Some(JobStatus::Ready),
        StatusCode::ACCEPTED => Some(JobStatus::Pending),
        s if s.is_client_error() => Some(JobStatus::Failed),
        _ => None,
    }
}

pub(crate) struct CohortJob<'a> {
    transport: &'a Transport,
    policy: &'a PollPolicy,
    cancel: &'a CancelToken,
}

#[derive(Debug, Default)]
struct PollStats {
    pending_polls: u32,
    error_polls: u32,
}

impl<'a> CohortJob<'a> {
    pub(crate) fn new(
        transport: &'a Transport,
        policy: &'a PollPolicy,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            transport,
            policy,
            cancel,
        }
    }

    /// Submits, waits for and downloads a cohort export.
    #[instrument(skip_all, fields(cohort_id = %request.cohort_id))]
    pub(crate) fn run(
        &self,
        request: &CohortRequest,
        target: &Path,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<JobReport> {
        let handle = self.submit(request)?;
        let stats = self.wait_until_ready(&handle)?;
        let bytes = self.download(&handle, target, progress)?;

        Ok(JobReport {
            request_id: handle.0,
            path: target.to_path_buf(),
            bytes,
            pending_polls: stats.pending_polls,
            error_polls: stats.error_polls,
        })
    }

    fn submit(&self, request: &CohortRequest) -> Result<JobHandle> {
        let path = format!("/api/5/cohorts/request/{}", encode(&request.cohort_id));
        let props = if request.include_properties { "1" } else { "0" };
        let query = [("props", props.to_string())];
        let reply: SubmitReply = self.transport.json(Method::GET, &path, &query, self.cancel)?;

        info!(
            request_id = %reply.request_id,
            cohort_id = reply.cohort_id.as_deref().unwrap_or(&request.cohort_id),
            "cohort request submitted"
        );
        Ok(JobHandle(reply.request_id))
    }

    fn wait_until_ready(&self, handle: &JobHandle) -> Result<PollStats> {
        let path = format!("/api/5/cohorts/request-status/{}", encode(handle.request_id()));
        let started = Instant::now();
        let deadline = self.policy.max_wait.and_then(|w| started.checked_add(w));
        let mut stats = PollStats::default();
        let mut consecutive_errors = 0u32;
        let mut last_status: Option<JobStatus> = None;

        loop {
            let polled = self.transport.dispatch_until(
                Method::GET,
                &path,
                &[],
                Retry::Transient,
                self.cancel,
                deadline,
            );

            let wait = match polled {
                Ok(resp) => {
                    let (status, body) = read_status(resp);
                    let reply = parse_status(&body);

                    match classify(status, reply.async_status.as_deref()) {
                        Some(state) => {
                            consecutive_errors = 0;
                            if last_status != Some(state) {
                                last_status = Some(state);
                                info!(
                                    request_id = handle.request_id(),
                                    ?state,
                                    async_status = reply.async_status.as_deref(),
                                    "cohort job status"
                                );
                            }
                            match state {
                                JobStatus::Ready => return Ok(stats),
                                JobStatus::Failed => {
                                    return Err(Error::JobFailed {
                                        request_id: handle.request_id().to_string(),
                                        status,
                                        body,
                                    });
                                }
                                JobStatus::Pending => {
                                    stats.pending_polls += 1;
                                    self.policy.pending_interval
                                }
                            }
                        }
                        None => {
                            warn!(
                                request_id = handle.request_id(),
                                %status,
                                body = %excerpt(&body, 200),
                                "unexpected status poll response, retrying"
                            );
                            self.record_error_poll(
                                handle,
                                started,
                                &mut stats,
                                &mut consecutive_errors,
                            )?
                        }
                    }
                }
                Err(Error::Network { url, source }) => {
                    warn!(
                        request_id = handle.request_id(),
                        %url,
                        error = %source,
                        "status poll failed, retrying"
                    );
                    self.record_error_poll(handle, started, &mut stats, &mut consecutive_errors)?
                }
                Err(e) => return Err(e),
            };

            if let Some(max_wait) = self.policy.max_wait {
                if started.elapsed() + wait > max_wait {
                    return Err(self.timeout(handle, started, &stats));
                }
            }
            self.cancel.sleep(wait)?;
        }
    }

    fn record_error_poll(
        &self,
        handle: &JobHandle,
        started: Instant,
        stats: &mut PollStats,
        consecutive_errors: &mut u32,
    ) -> Result<Duration> {
        stats.error_polls += 1;
        *consecutive_errors += 1;
        if *consecutive_errors > self.policy.max_error_polls {
            return Err(self.timeout(handle, started, stats));
        }
        Ok(self.policy.error_interval)
    }

    fn timeout(&self, handle: &JobHandle, started: Instant, stats: &PollStats) -> Error {
        Error::PollTimeout {
            request_id: handle.request_id().to_string(),
            waited: started.elapsed(),
            error_polls: stats.error_polls,
        }
    }

    fn download(
        &self,
        handle: &JobHandle,
        target: &Path,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<u64> {
        let path = format!("/api/5/cohorts/request/{}/file", encode(handle.request_id()));
        debug!(url = %self.transport.url(&path), "downloading cohort file");

        let resp = self.transport.request(Method::GET, &path, &[], self.cancel)?;
        let expected = expected_length(&resp);
        download(resp, target, expected, progress, self.cancel)
    }
}

fn parse_status(body: &str) -> StatusReply {
    if body.trim().is_empty() {
        return StatusReply::default();
    }
    serde_json::from_str(body).unwrap_or_else(|e| {
        debug!(error = %e, body = %excerpt(body, 200), "status body is not JSON");
        StatusReply::default()
    })
}

fn read_status(resp: Response) -> (StatusCode, String) {
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    (status, body)
}
