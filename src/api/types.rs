//! API Request/Response Types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::models::errors::AppError;
use crate::models::types::{
    AnalysisRecord, ModelResult, RiskHistoryEntry, RiskLevel, ScanResult, SimilarContract,
};
use crate::utils::cache::CacheStats;
use crate::utils::constants::{DEFAULT_HISTORY_DAYS, DEFAULT_SIMILAR_TOP_K};
use crate::utils::telemetry::TelemetryStats;

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub latency_ms: f64,
    pub timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, start: Instant) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(error: ApiError, start: Instant) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// API Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            code: "UNAUTHORIZED".to_string(),
            message: "Invalid or missing API key".to_string(),
            details: None,
        }
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Self {
            code: "RATE_LIMITED".to_string(),
            message: format!("Rate limit exceeded. Retry after {} seconds", retry_after),
            details: Some(format!("retry_after: {}", retry_after)),
        }
    }
}

impl From<&AppError> for ApiError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code_str().to_string(),
            message: err.message.clone(),
            details: None,
        }
    }
}

/// Error half of every handler result: status plus error envelope
#[derive(Debug)]
pub struct ApiFailure {
    pub status: StatusCode,
    pub body: ApiResponse<()>,
}

impl ApiFailure {
    pub fn new(status: StatusCode, error: ApiError, start: Instant) -> Self {
        Self {
            status,
            body: ApiResponse::error(error, start),
        }
    }

    pub fn from_app(err: &AppError, start: Instant) -> Self {
        let status = StatusCode::from_u16(err.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, ApiError::from(err), start)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiFailure>;

// ============================================
// Health
// ============================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthData {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub services: Vec<String>,
    pub registry_enabled: bool,
}

// ============================================
// Scan
// ============================================

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub contract_address: String,
    /// Registry write override. Unset writes whenever a signer is configured,
    /// `false` skips the write.
    #[serde(default)]
    pub write_onchain: Option<bool>,
}

/// Scan result as returned by the API (source and bytecode omitted)
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanData {
    pub scan_id: String,
    pub contract_address: String,
    pub verified: bool,
    pub contract_name: Option<String>,
    pub risk_score: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub explanation: Option<String>,
    pub detected_issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub model_contributions: BTreeMap<String, f64>,
    pub ai_outputs: BTreeMap<String, ModelResult>,
    pub embedding_stored: bool,
    pub log_saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onchain_tx: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl From<ScanResult> for ScanData {
    fn from(result: ScanResult) -> Self {
        let (detected_issues, recommendations, model_contributions) = match result.aggregated {
            Some(agg) => (agg.detected_issues, agg.recommendations, agg.model_contributions),
            None => Default::default(),
        };
        Self {
            verified: result
                .normalized_metadata
                .as_ref()
                .map(|m| m.verified)
                .unwrap_or(false),
            contract_name: result.normalized_metadata.map(|m| m.contract_name),
            scan_id: result.scan_id,
            contract_address: result.contract_address,
            risk_score: result.final_risk_score,
            risk_level: result.risk_level,
            explanation: result.explanation,
            detected_issues,
            recommendations,
            model_contributions,
            ai_outputs: result.ai_outputs,
            embedding_stored: result.embedding_stored,
            log_saved: result.log_saved,
            onchain_tx: None,
            warnings: result.warnings,
            duration_ms: result.duration_ms,
        }
    }
}

// ============================================
// Registry score
// ============================================

#[derive(Debug, Serialize, Deserialize)]
pub struct OnchainScoreData {
    pub contract_address: String,
    pub risk_score: Option<String>,
}

// ============================================
// History / scans / similar
// ============================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    DEFAULT_HISTORY_DAYS
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryData {
    pub contract_address: String,
    pub days: u32,
    pub entries: Vec<RiskHistoryEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_SIMILAR_TOP_K
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimilarData {
    pub contract_address: String,
    pub matches: Vec<SimilarContract>,
}

/// Stored record without the raw embedding
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanRecordData {
    pub scan_id: String,
    pub contract_address: String,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub explanation: String,
    pub detected_issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub model_contributions: BTreeMap<String, f64>,
    pub created_at: i64,
}

impl From<AnalysisRecord> for ScanRecordData {
    fn from(record: AnalysisRecord) -> Self {
        Self {
            scan_id: record.scan_id,
            contract_address: record.contract_address,
            risk_score: record.risk_score,
            risk_level: record.risk_level,
            explanation: record.explanation,
            detected_issues: record.detected_issues,
            recommendations: record.recommendations,
            model_contributions: record.model_contributions,
            created_at: record.created_at,
        }
    }
}

// ============================================
// Stats
// ============================================

#[derive(Debug, Serialize)]
pub struct StatsData {
    pub telemetry: TelemetryStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_cache: Option<CacheStats>,
    pub uptime_seconds: u64,
}
