use std::path::Path;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::cohort::{CohortJob, CohortRequest, JobReport, PollPolicy};
use crate::config::{ClientConfig, Credentials, ProxyConfig, load_config};
use crate::download::{Downloaded, ProgressSink, progress_bar};
use crate::error::Result;
use crate::export::{self, ExportRange};
use crate::region::Region;
use crate::transport::{RetryPolicy, Transport};

/// Blocking client for one Amplitude project.
///
/// Every operation blocks until it completes or fails. Clones share the
/// underlying connection pool. Each operation gets its own cancellation token
/// unless one is set with [`with_cancel_token`](Self::with_cancel_token) or
/// passed to a `*_with` method.
#[derive(Debug, Clone)]
pub struct Client {
    pub(crate) transport: Transport,
    cancel: Option<CancelToken>,

    poll: PollPolicy,
    progress: bool,
}

impl Client {
    /// Creates a client from environment variables and/or `.amplituderc`.
    pub fn from_env() -> anyhow::Result<Self> {
        let cfg = load_config()?;
        Ok(Self::from_config(&cfg)?)
    }

    pub fn new(credentials: Credentials, region: Region) -> Result<Self> {
        Self::from_config(&ClientConfig::new(credentials, region))
    }

    pub fn from_config(cfg: &ClientConfig) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(cfg)?,
            cancel: None,
            poll: PollPolicy::default(),
            progress: true,
        })
    }

    /// Sends requests to `base_url` instead of the region's host, e.g. a gateway.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.transport.set_base_url(base_url.into());
        self
    }

    /// Timeout for connecting and for each read of a response body.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.transport.reconfigure(|cfg| cfg.timeout = timeout)?;
        Ok(self)
    }

    /// Routes requests through the given proxies. Fails on an unparsable proxy URL.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Result<Self> {
        self.transport.reconfigure(|cfg| cfg.proxy = proxy)?;
        Ok(self)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.transport.set_retry_policy(retry);
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Shows a progress bar on stderr while downloading. Enabled by default.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Token observed by every operation of this client and its clones.
    ///
    /// Once cancelled it stays cancelled, so all of them fail with
    /// [`Error::Cancelled`](crate::Error::Cancelled) from then on. Pass a token to
    /// [`download_cohort_with`](Self::download_cohort_with) or
    /// [`export_project_data_with`](Self::export_project_data_with) to abort a
    /// single operation instead.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// The client-wide token, or a fresh one per call.
    pub(crate) fn operation_token(&self) -> CancelToken {
        self.cancel.clone().unwrap_or_default()
    }

    /// Exports a cohort to a CSV file at `target`.
    ///
    /// Submits the export, polls until the server has built the file, then streams it
    /// to disk. Blocks for the whole exchange.
    pub fn download_cohort(
        &self,
        request: &CohortRequest,
        target: impl AsRef<Path>,
    ) -> Result<JobReport> {
        self.download_cohort_with(request, target, &self.operation_token())
    }

    /// Like [`download_cohort`](Self::download_cohort), aborted when `cancel` fires.
    pub fn download_cohort_with(
        &self,
        request: &CohortRequest,
        target: impl AsRef<Path>,
        cancel: &CancelToken,
    ) -> Result<JobReport> {
        let target = target.as_ref();
        let pb = self.progress.then(|| progress_bar(target));
        let sink = pb.as_ref().map(|pb| pb as &dyn ProgressSink);

        CohortJob::new(&self.transport, &self.poll, cancel).run(request, target, sink)
    }

    /// Downloads all raw events of `range` as a zip of hourly gzip files.
    pub fn export_project_data(
        &self,
        range: &ExportRange,
        target: impl AsRef<Path>,
    ) -> Result<Downloaded> {
        self.export_project_data_with(range, target, &self.operation_token())
    }

    pub fn export_project_data_with(
        &self,
        range: &ExportRange,
        target: impl AsRef<Path>,
        cancel: &CancelToken,
    ) -> Result<Downloaded> {
        let target = target.as_ref();
        let pb = self.progress.then(|| progress_bar(target));
        let sink = pb.as_ref().map(|pb| pb as &dyn ProgressSink);

        export::export_project_data(&self.transport, range, target, sink, cancel)
    }
}
