//! Streaming of large response bodies to disk.

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Response;
use reqwest::header::CONTENT_LENGTH;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// Size of every read from the source stream.
pub const CHUNK_SIZE: usize = 8192;

/// A file written from a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Receives progress while a body is written to disk.
pub trait ProgressSink {
    /// Called once before the first chunk; `total` is `None` when the size is unknown.
    fn begin(&self, total: Option<u64>);
    fn advance(&self, bytes: u64);
    fn finish(&self);
}

impl ProgressSink for ProgressBar {
    fn begin(&self, total: Option<u64>) {
        if let Some(total) = total {
            self.set_length(total);
        }
    }

    fn advance(&self, bytes: u64) {
        self.inc(bytes);
    }

    fn finish(&self) {
        self.finish_and_clear();
    }
}

/// Progress bar labelled with the destination file name.
pub(crate) fn progress_bar(target: &Path) -> ProgressBar {
    let pb = ProgressBar::no_length();
    if let Ok(style) = ProgressStyle::with_template(
        "{msg} {spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
    ) {
        pb.set_style(style.progress_chars("=>-"));
    }
    if let Some(name) = target.file_name() {
        pb.set_message(name.to_string_lossy().into_owned());
    }
    pb
}

/// `Content-Length` of a response; absent, unparsable or zero means unknown.
pub(crate) fn expected_length(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&n| n > 0)
}

/// Copies `source` into `target` chunk by chunk and returns the number of bytes written.
///
/// The target is created (with missing parent directories) or truncated. On failure
/// the partial file stays on disk; the caller decides whether to remove it.
pub fn download<R: Read>(
    mut source: R,
    target: &Path,
    expected: Option<u64>,
    progress: Option<&dyn ProgressSink>,
    cancel: &CancelToken,
) -> Result<u64> {
    let io_err = |source| Error::Io {
        path: target.to_path_buf(),
        source,
    };

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| Error::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let mut out = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(target)
        .map_err(io_err)?;

    if let Some(p) = progress {
        p.begin(expected);
    }
    debug!(target = %target.display(), ?expected, "writing response body");

    let mut buf = [0u8; CHUNK_SIZE];
    let mut written: u64 = 0;
    loop {
        cancel.check()?;
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => return Err(Error::Stream { written, source }),
        };

        out.write_all(&buf[..n]).map_err(io_err)?;
        written += n as u64;
        if let Some(p) = progress {
            p.advance(n as u64);
        }
    }

    out.flush().map_err(io_err)?;

    if let Some(p) = progress {
        p.finish();
    }

    if let Some(expected) = expected {
        if written != expected {
            return Err(Error::Incomplete {
                path: target.to_path_buf(),
                expected,
                written,
            });
        }
    }

    info!(target = %target.display(), bytes = written, "download complete");
    Ok(written)
}
