use amplitude_data::{Client, Error, ExportRange};
use anyhow::Result;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let client = Client::from_env()?;

    // One hour of raw events, formatted YYYYMMDDTHH.
    let range = ExportRange::new("20220601T00", "20220601T01");
    match client.export_project_data(&range, "data/projectdata.zip") {
        Ok(file) => println!("{} bytes written to {}", file.bytes, file.path.display()),
        Err(Error::NoData { .. }) => println!("nothing was collected in that range"),
        Err(e) => return Err(e.into()),
    }

    let user = client.find_user("example-device-id")?;
    for m in &user.matches {
        println!("amplitude id {} (user {:?})", m.amplitude_id, m.user_id);
    }
    Ok(())
}
