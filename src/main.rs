//! cf-ddns - Cloudflare dynamic DNS updater.

use anyhow::Context;
use cf_ddns::config::Config;
use cf_ddns::detector::IpDetector;
use cf_ddns::providers::CloudflareClient;
use cf_ddns::scheduler::Scheduler;
use cf_ddns::shutdown::cancel_on_signal;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cf-ddns")]
#[command(about = "Keep Cloudflare A/AAAA records in sync with this host's public IPs")]
#[command(version)]
struct Cli {
    /// Keep running and re-check on an interval
    #[arg(long)]
    repeat: bool,

    /// Path to config file
    #[arg(short, long = "config-path", alias = "config")]
    config_path: Option<PathBuf>,

    /// Seconds between checks in repeating mode
    #[arg(
        long,
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config_path.unwrap_or_else(Config::default_path);

    let config = Config::load_from(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let api = CloudflareClient::new(config.authentication.credentials()?)?;
    let detector = IpDetector::new()?;

    let mut scheduler = Scheduler::new(Box::new(api), &config, detector)
        .with_interval(Duration::from_secs(cli.interval));

    if cli.repeat {
        tracing::info!(
            "Updating IPv4 (A) & IPv6 (AAAA) records every {}s",
            scheduler.interval().as_secs()
        );

        let shutdown = CancellationToken::new();
        tokio::spawn(cancel_on_signal(shutdown.clone()));
        scheduler.run_repeating(shutdown).await;
        return Ok(());
    }

    if !scheduler.run_once().await.is_success() {
        anyhow::bail!("one or more zones could not be updated");
    }

    Ok(())
}
