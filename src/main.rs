//! Scathat Scanner - one-shot contract scan
//!
//! Usage:
//!   scathat_scan <contract_address> [--summary]
//!
//! Prints the scan result as JSON on stdout; logs go to stderr.

use eyre::{bail, Result};
use scathat_scanner::utils::constants::is_valid_address;
use scathat_scanner::{ScannerConfig, ScannerServices};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let summary_only = args.iter().any(|a| a == "--summary");
    let Some(address) = args.iter().find(|a| !a.starts_with("--")) else {
        bail!("usage: scathat_scan <contract_address> [--summary]");
    };
    if !is_valid_address(address) {
        bail!("invalid contract address: {}", address);
    }

    let config = ScannerConfig::from_env()?;
    let services = ScannerServices::from_config(&config)?;

    let result = services.orchestrator.scan(address).await;
    let output = if summary_only {
        serde_json::to_string_pretty(&result.summary())?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{}", output);

    if let Err(e) = services.telemetry.export_stats_json() {
        tracing::warn!("⚠️ Failed to export telemetry: {}", e);
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
