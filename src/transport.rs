use reqwest::Method;
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Proxy;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::{ClientConfig, ProxyConfig};
use crate::error::{Error, Result};
use crate::util::{retriable_status, urljoin};

/// Bounded exponential backoff for transient gateway failures.
///
/// With the defaults a request is dispatched at most 5 times, waiting
/// 1s, 2s, 4s and 8s between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first dispatch and is clamped to at least 1.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// A policy that dispatches every request exactly once.
    pub fn never() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Whether a request may be dispatched again after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retry {
    Transient,
    Never,
}

impl Retry {
    /// Only idempotent reads are replayed.
    pub(crate) fn for_method(method: &Method) -> Self {
        if *method == Method::GET {
            Retry::Transient
        } else {
            Retry::Never
        }
    }
}

pub(crate) type Query<'a> = [(&'a str, String)];

#[derive(Debug, Clone)]
pub(crate) struct Transport {
    http: HttpClient,
    pub(crate) config: ClientConfig,
    base_url: String,
    retry: RetryPolicy,
}

impl Transport {
    pub(crate) fn new(cfg: &ClientConfig) -> Result<Self> {
        Ok(Self {
            http: build_http(cfg)?,
            config: cfg.clone(),
            base_url: cfg.region.base_url().to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Rebuilds the HTTP client after changing connection settings.
    ///
    /// Base URL and retry policy are kept. On error the transport is unchanged.
    pub(crate) fn reconfigure(&mut self, update: impl FnOnce(&mut ClientConfig)) -> Result<()> {
        let mut config = self.config.clone();
        update(&mut config);
        self.http = build_http(&config)?;
        self.config = config;
        Ok(())
    }

    pub(crate) fn set_base_url(&mut self, base_url: String) {
        self.base_url = base_url;
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub(crate) fn url(&self, path: &str) -> String {
        urljoin(&self.base_url, path)
    }

    /// Sends a request, replaying it on 502/503/504 and connection failures when allowed.
    ///
    /// The final response is returned whatever its status.
    pub(crate) fn dispatch(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        retry: Retry,
        cancel: &CancelToken,
    ) -> Result<Response> {
        self.dispatch_until(method, path, query, retry, cancel, None)
    }

    /// Like [`dispatch`](Self::dispatch), but stops retrying once the next backoff
    /// would end past `deadline` and returns the last outcome instead.
    pub(crate) fn dispatch_until(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        retry: Retry,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<Response> {
        let url = self.url(path);
        let max_attempts = match retry {
            Retry::Transient => self.retry.max_attempts(),
            Retry::Never => 1,
        };
        let credentials = &self.config.credentials;

        let mut attempt = 0u32;
        loop {
            cancel.check()?;
            attempt += 1;
            debug!(%method, %url, attempt, "dispatching request");

            let result = self
                .http
                .request(method.clone(), &url)
                .basic_auth(credentials.api_key(), Some(credentials.secret()))
                .query(query)
                .send();

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if !retriable_status(status.as_u16()) || attempt >= max_attempts {
                        return Ok(resp);
                    }
                    let delay = self.retry.delay_for(attempt);
                    if overruns(deadline, delay) {
                        debug!(%url, %status, attempt, "no time left to retry");
                        return Ok(resp);
                    }
                    warn!(%url, %status, attempt, ?delay, "transient server error, retrying");
                    cancel.sleep(delay)?;
                }
                Err(source) => {
                    let transient = source.is_connect() || source.is_timeout();
                    let delay = self.retry.delay_for(attempt);
                    if !transient || attempt >= max_attempts || overruns(deadline, delay) {
                        return Err(Error::Network { url, source });
                    }
                    warn!(%url, error = %source, attempt, ?delay, "request failed, retrying");
                    cancel.sleep(delay)?;
                }
            }
        }
    }

    /// Like [`dispatch`](Self::dispatch) but turns any non-2xx status into [`Error::Http`].
    pub(crate) fn request(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        cancel: &CancelToken,
    ) -> Result<Response> {
        let retry = Retry::for_method(&method);
        let resp = self.dispatch(method, path, query, retry, cancel)?;
        ensure_success(resp)
    }

    pub(crate) fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        cancel: &CancelToken,
    ) -> Result<T> {
        let resp = self.request(method, path, query, cancel)?;
        read_json(resp)
    }
}

pub(crate) fn ensure_success(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp.text().unwrap_or_default();
    Err(Error::Http { status, url, body })
}

pub(crate) fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let url = resp.url().to_string();
    let text = resp.text().map_err(|source| Error::Network {
        url: url.clone(),
        source,
    })?;
    // Some endpoints answer 2xx with an empty body.
    let text = if text.trim().is_empty() { "null" } else { text.as_str() };
    serde_json::from_str(text).map_err(|source| Error::Decode { url, source })
}

fn build_http(cfg: &ClientConfig) -> Result<HttpClient> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("amplitude-data-rs/{}", env!("CARGO_PKG_VERSION")))
            .unwrap_or(HeaderValue::from_static("amplitude-data-rs")),
    );
    default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let mut builder = HttpClient::builder()
        .default_headers(default_headers)
        .timeout(cfg.timeout);

    for proxy in proxies(&cfg.proxy)? {
        builder = builder.proxy(proxy);
    }

    if !cfg.verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(Error::Client)
}

fn overruns(deadline: Option<Instant>, delay: Duration) -> bool {
    deadline.is_some_and(|d| Instant::now() + delay >= d)
}

fn proxies(cfg: &ProxyConfig) -> Result<Vec<Proxy>> {
    let mut out = Vec::new();
    if let Some(url) = &cfg.http {
        out.push(Proxy::http(url).map_err(|source| Error::InvalidProxy {
            url: url.clone(),
            source,
        })?);
    }
    if let Some(url) = &cfg.https {
        out.push(Proxy::https(url).map_err(|source| Error::InvalidProxy {
            url: url.clone(),
            source,
        })?);
    }
    Ok(out)
}
