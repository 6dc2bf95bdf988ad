use amplitude_data::{Client, CohortRequest};
use anyhow::Result;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Example program that calls the library API.
    // Configure credentials via env vars or a `.amplituderc` file.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cohort_id = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: cohort_export <cohort-id> [target.csv]"))?;
    let target = std::env::args()
        .nth(2)
        .unwrap_or_else(|| "data/cohortdata.csv".to_string());

    let client = Client::from_env()?;
    let request = CohortRequest::new(cohort_id).with_properties(true);
    let report = client.download_cohort(&request, &target)?;

    println!(
        "request {} written to {} ({} bytes)",
        report.request_id,
        report.path.display(),
        report.bytes
    );
    Ok(())
}
