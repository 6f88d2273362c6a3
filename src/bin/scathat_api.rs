//! Scathat Scanner API Server
//!
//! Usage:
//!   cargo run --bin scathat_api
//!
//! Environment:
//!   PORT / SCATHAT_PORT - Server port (default: 8080)
//!   SCATHAT_HOST        - Server host (default: 0.0.0.0)
//!   SCATHAT_API_KEYS    - Comma-separated API keys (empty disables auth)
//!   RUST_LOG            - Log filter (default: info)

use scathat_scanner::api::{create_router, start_cleanup_task, AppState};
use scathat_scanner::utils::constants::{APP_NAME, APP_VERSION};
use scathat_scanner::{ScannerConfig, ScannerServices};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    print_banner();

    let config = ScannerConfig::from_env()?;
    let services = ScannerServices::from_config(&config)?;
    let telemetry = services.telemetry.clone();

    // Engine cache maintenance
    if let Some(engine) = services.engine.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let removed = engine.cleanup_cache();
                if removed > 0 {
                    info!("🧹 Engine cache cleanup: {} expired entries removed", removed);
                }
            }
        });
    }

    let state = Arc::new(AppState::new(services, &config.api));
    start_cleanup_task(state.rate_limiter.clone());
    info!("🧹 Background cleanup tasks started");

    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port).parse()?;

    info!("🚀 {} API starting on http://{}", APP_NAME, addr);
    info!("");
    info!("Endpoints:");
    info!("  POST /v1/scan                 - Scan a contract");
    info!("  GET  /v1/scans/:scan_id       - Stored scan record");
    info!("  GET  /v1/score/:address       - On-chain registry score");
    info!("  GET  /v1/history/:address     - Risk history (?days=30)");
    info!("  GET  /v1/similar/:address     - Similar contracts (?top_k=5)");
    info!("  GET  /v1/stats                - Scan statistics");
    info!("  GET  /v1/health               - Health check");
    info!("");
    info!("Press Ctrl+C for graceful shutdown");

    let listener = TcpListener::bind(addr).await?;

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("⚠️ Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("🛑 Shutdown signal received, cleaning up...");
    let stats = telemetry.get_stats();
    info!("   Total scans: {}", stats.total_scans);
    info!("   Dangerous verdicts: {}", stats.dangerous_verdicts);
    info!("   Analyzer fallbacks: {}", stats.analyzer_fallbacks);

    match telemetry.export_stats_json() {
        Ok(path) => info!("   ✅ Stats exported to: {}", path.display()),
        Err(e) => warn!("   ⚠️ Failed to export stats: {}", e),
    }

    info!("👋 {} API shutdown complete", APP_NAME);
    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ╔══════════════════════════════════════════════════════╗
    ║                                                      ║
    ║        S C A T H A T   S C A N N E R   v{:<8}     ║
    ║     Multi-model smart-contract risk analysis         ║
    ║                                                      ║
    ╚══════════════════════════════════════════════════════╝
    "#,
        APP_VERSION
    );
}
