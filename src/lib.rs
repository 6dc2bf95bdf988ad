//! A blocking Rust client for the Amplitude analytics REST API.
//!
//! Besides thin wrappers for charts, user search, deletions, segmentation and the
//! event taxonomy, the crate implements the two long-running flows of the API:
//! cohort export (submit, poll until ready, then download) and bulk project export
//! (one long request streamed to disk).
//!
//! ## Quick start
//! - Configure credentials via environment variables (`AMPLITUDE_API_KEY`,
//!   `AMPLITUDE_SECRET_KEY`, optionally `AMPLITUDE_REGION`) or a `.amplituderc` file
//!   (in the current directory or your home directory).
//! - Call [`Client::download_cohort`] or [`Client::export_project_data`].
//!
//! ```no_run
//! use amplitude_data::{Client, CohortRequest};
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?;
//!     let report = client.download_cohort(
//!         &CohortRequest::new("abc123").with_properties(true),
//!         "data/cohort.csv",
//!     )?;
//!     println!("{} bytes written to {}", report.bytes, report.path.display());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

mod cancel;
mod client;
mod cohort;
mod config;
mod download;
mod endpoints;
mod error;
mod export;
mod region;
mod transport;
mod util;

pub use cancel::CancelToken;
pub use client::Client;
pub use cohort::{CohortRequest, JobReport, PollPolicy};
pub use config::{ClientConfig, Credentials, DEFAULT_TIMEOUT, ProxyConfig};
pub use download::{CHUNK_SIZE, Downloaded, ProgressSink, download};
pub use endpoints::{DeletionRequest, SegmentationQuery, UserMatch, UserSearch};
pub use error::{Error, Result};
pub use export::ExportRange;
pub use region::{ParseRegionError, Region};
pub use transport::RetryPolicy;
