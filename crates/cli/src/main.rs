//! rctf-mirror entry point.
//!
//! Loads configuration from `.env`, the environment and an optional TOML
//! file, then runs one harvest into the configured archive.
//! Logging goes to stderr.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use rctf_mirror_client::Harvester;
use rctf_mirror_core::AppConfig;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    if std::env::var_os("RCTF_LOG_JSON").is_some() {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv().ok();
    init_tracing();
    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }

    let config = AppConfig::load().context("failed to load configuration")?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        store = ?config.store,
        max_concurrency = config.max_concurrency,
        "Starting harvest"
    );

    let harvester = Harvester::from_config(&config).await.context("failed to set up harvest")?;
    let report = harvester.run().await.context("harvest failed")?;

    tracing::info!(
        challenges = report.challenges,
        divisions = report.divisions,
        participants = report.participants,
        requests = report.requests,
        downloads = report.downloads,
        "Harvest complete"
    );

    Ok(())
}
