//! Bulk project export: one blocking request streamed straight to disk.

use reqwest::{Method, StatusCode};
use std::path::Path;
use tracing::{info, instrument};

use crate::cancel::CancelToken;
use crate::download::{Downloaded, ProgressSink, download, expected_length};
use crate::error::{Error, Result};
use crate::transport::{Retry, Transport, ensure_success};

/// Hour range of raw events to export, formatted `YYYYMMDDTHH` (e.g. `20220601T00`).
///
/// The server rejects ranges longer than 365 days or producing more than 4GB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRange {
    pub start: String,
    pub end: String,
}

impl ExportRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

// The server holds the connection until the archive is built; 504 means it gave up,
// so the request is never replayed.
#[instrument(skip_all, fields(start = %range.start, end = %range.end))]
pub(crate) fn export_project_data(
    transport: &Transport,
    range: &ExportRange,
    target: &Path,
    progress: Option<&dyn ProgressSink>,
    cancel: &CancelToken,
) -> Result<Downloaded> {
    let query = [("start", range.start.clone()), ("end", range.end.clone())];
    info!("export request submitted");
    let resp = transport.dispatch(Method::GET, "/api/2/export", &query, Retry::Never, cancel)?;

    let bounds = || (range.start.clone(), range.end.clone());
    match resp.status() {
        StatusCode::BAD_REQUEST => {
            let (start, end) = bounds();
            Err(Error::ExportTooLarge { start, end })
        }
        StatusCode::NOT_FOUND => {
            let (start, end) = bounds();
            Err(Error::NoData { start, end })
        }
        StatusCode::GATEWAY_TIMEOUT => {
            let (start, end) = bounds();
            Err(Error::ExportTimeout { start, end })
        }
        _ => {
            let resp = ensure_success(resp)?;
            let expected = expected_length(&resp);
            info!(target = %target.display(), ?expected, "export ready, downloading");
            let bytes = download(resp, target, expected, progress, cancel)?;
            Ok(Downloaded {
                path: target.to_path_buf(),
                bytes,
            })
        }
    }
}
