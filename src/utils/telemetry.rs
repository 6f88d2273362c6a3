//! Scan telemetry
//!
//! Lock-free counters updated by the orchestrator after every scan,
//! surfaced by `/v1/stats` and exported to JSON on shutdown.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::types::{RiskLevel, ScanResult};

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Snapshot of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub total_scans: u64,
    pub successful_scans: u64,
    pub failed_scans: u64,
    pub safe_verdicts: u64,
    pub warning_verdicts: u64,
    pub dangerous_verdicts: u64,
    /// Analyzer calls replaced by a fallback result
    pub analyzer_fallbacks: u64,
    pub avg_latency_ms: f64,
    pub period_start: u64,
    pub period_end: u64,
}

/// Process-wide scan counters
pub struct ScanTelemetry {
    total_scans: AtomicU64,
    successful_scans: AtomicU64,
    failed_scans: AtomicU64,
    safe_verdicts: AtomicU64,
    warning_verdicts: AtomicU64,
    dangerous_verdicts: AtomicU64,
    analyzer_fallbacks: AtomicU64,
    total_latency_ms: AtomicU64,
    session_start: u64,
    export_dir: PathBuf,
}

impl Default for ScanTelemetry {
    fn default() -> Self {
        Self::new(PathBuf::from("./telemetry"))
    }
}

impl ScanTelemetry {
    pub fn new(export_dir: PathBuf) -> Self {
        Self {
            total_scans: AtomicU64::new(0),
            successful_scans: AtomicU64::new(0),
            failed_scans: AtomicU64::new(0),
            safe_verdicts: AtomicU64::new(0),
            warning_verdicts: AtomicU64::new(0),
            dangerous_verdicts: AtomicU64::new(0),
            analyzer_fallbacks: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            session_start: current_timestamp(),
            export_dir,
        }
    }

    /// Record one finished scan
    pub fn record_scan(&self, result: &ScanResult) {
        self.total_scans.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(result.duration_ms, Ordering::Relaxed);

        if result.success {
            self.successful_scans.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_scans.fetch_add(1, Ordering::Relaxed);
        }

        match result.risk_level {
            Some(RiskLevel::Safe) => self.safe_verdicts.fetch_add(1, Ordering::Relaxed),
            Some(RiskLevel::Warning) => self.warning_verdicts.fetch_add(1, Ordering::Relaxed),
            Some(RiskLevel::Dangerous) => self.dangerous_verdicts.fetch_add(1, Ordering::Relaxed),
            None => 0,
        };
    }

    pub fn record_fallback(&self) {
        self.analyzer_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> TelemetryStats {
        let total_scans = self.total_scans.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);
        let avg_latency_ms = if total_scans > 0 {
            total_latency as f64 / total_scans as f64
        } else {
            0.0
        };

        TelemetryStats {
            total_scans,
            successful_scans: self.successful_scans.load(Ordering::Relaxed),
            failed_scans: self.failed_scans.load(Ordering::Relaxed),
            safe_verdicts: self.safe_verdicts.load(Ordering::Relaxed),
            warning_verdicts: self.warning_verdicts.load(Ordering::Relaxed),
            dangerous_verdicts: self.dangerous_verdicts.load(Ordering::Relaxed),
            analyzer_fallbacks: self.analyzer_fallbacks.load(Ordering::Relaxed),
            avg_latency_ms,
            period_start: self.session_start,
            period_end: current_timestamp(),
        }
    }

    /// Write current stats to `<export_dir>/stats_<ts>.json`
    pub fn export_stats_json(&self) -> Result<PathBuf, std::io::Error> {
        fs::create_dir_all(&self.export_dir)?;
        let stats = self.get_stats();
        let path = self
            .export_dir
            .join(format!("stats_{}.json", current_timestamp()));
        let json = serde_json::to_string_pretty(&stats)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}
