//! API Request Handlers

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::middleware::{RateLimitConfig, RateLimiter};
use super::types::*;
use crate::core::services::ScannerServices;
use crate::models::config::ApiConfig;
use crate::models::errors::AppError;
use crate::utils::constants::is_valid_address;

/// Shared application state
pub struct AppState {
    pub services: ScannerServices,
    pub rate_limiter: Arc<RateLimiter>,
    /// Accepted API keys; empty disables auth
    pub api_keys: Vec<String>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(services: ScannerServices, api: &ApiConfig) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            requests_per_window: api.rate_limit_requests,
            window_duration: api.rate_limit_window,
        }));
        if api.api_keys.is_empty() {
            warn!("⚠️ SCATHAT_API_KEYS not set, API key auth disabled");
        }
        Self {
            services,
            rate_limiter,
            api_keys: api.api_keys.clone(),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

fn validated_address(raw: &str, start: Instant) -> Result<String, ApiFailure> {
    let address = raw.trim();
    if is_valid_address(address) {
        Ok(address.to_lowercase())
    } else {
        Err(ApiFailure::new(
            StatusCode::BAD_REQUEST,
            ApiError::bad_request("Invalid contract address format"),
            start,
        ))
    }
}

// ============================================
// Health Check
// ============================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthData>> {
    let start = Instant::now();

    let data = HealthData {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        services: state.services.orchestrator.service_names(),
        registry_enabled: state.services.registry.is_some(),
    };

    Json(ApiResponse::success(data, start))
}

// ============================================
// Scan
// ============================================

pub async fn scan_contract(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScanRequest>,
) -> ApiResult<ScanData> {
    let start = Instant::now();
    let address = validated_address(&req.contract_address, start)?;

    let result = state.services.orchestrator.scan(&address).await;
    if !result.success {
        let message = result
            .error
            .clone()
            .unwrap_or_else(|| "Scan failed".to_string());
        return Err(ApiFailure::from_app(&AppError::explorer_unavailable(message), start));
    }

    let level = result.risk_level;
    let mut data = ScanData::from(result);

    match (req.write_onchain, &state.services.registry, level) {
        (Some(false), _, _) => {}
        (_, Some(registry), Some(level)) if registry.can_write() => {
            match registry.write_score(&address, level.as_str()).await {
                Ok(tx) => data.onchain_tx = tx,
                Err(e) => {
                    warn!("⚠️ Registry write failed for {}: {}", address, e);
                    data.warnings.push(format!("registry: {}", e.message));
                }
            }
        }
        // Explicit request against a read-only or missing registry
        (Some(true), _, _) => data
            .warnings
            .push("registry: on-chain writes not configured".to_string()),
        _ => {}
    }

    info!(
        "🔎 API scan {} -> {:?} ({}ms)",
        address,
        data.risk_level,
        start.elapsed().as_millis()
    );
    Ok(Json(ApiResponse::success(data, start)))
}

// ============================================
// On-chain score
// ============================================

pub async fn get_onchain_score(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ApiResult<OnchainScoreData> {
    let start = Instant::now();
    let address = validated_address(&address, start)?;

    let registry = state.services.registry.as_ref().ok_or_else(|| {
        ApiFailure::new(
            StatusCode::SERVICE_UNAVAILABLE,
            ApiError::from(&AppError::chain_read("Registry not configured")),
            start,
        )
    })?;

    let risk_score = registry
        .read_score(&address)
        .await
        .map_err(|e| ApiFailure::from_app(&e, start))?;

    Ok(Json(ApiResponse::success(
        OnchainScoreData {
            contract_address: address,
            risk_score,
        },
        start,
    )))
}

// ============================================
// History / scans / similar
// ============================================

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryData> {
    let start = Instant::now();
    let address = validated_address(&address, start)?;

    let entries = state
        .services
        .orchestrator
        .history(&address, query.days)
        .await
        .map_err(|e| ApiFailure::from_app(&e, start))?;

    Ok(Json(ApiResponse::success(
        HistoryData {
            contract_address: address,
            days: query.days,
            entries,
        },
        start,
    )))
}

pub async fn get_scan(
    State(state): State<Arc<AppState>>,
    Path(scan_id): Path<String>,
) -> ApiResult<ScanRecordData> {
    let start = Instant::now();

    let record = state
        .services
        .orchestrator
        .get_scan(&scan_id)
        .await
        .map_err(|e| ApiFailure::from_app(&e, start))?
        .ok_or_else(|| {
            ApiFailure::from_app(&AppError::not_found(format!("Scan {} not found", scan_id)), start)
        })?;

    Ok(Json(ApiResponse::success(ScanRecordData::from(record), start)))
}

pub async fn get_similar(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<SimilarQuery>,
) -> ApiResult<SimilarData> {
    let start = Instant::now();
    let address = validated_address(&address, start)?;
    if query.top_k == 0 || query.top_k > 100 {
        return Err(ApiFailure::new(
            StatusCode::BAD_REQUEST,
            ApiError::bad_request("top_k must be between 1 and 100"),
            start,
        ));
    }

    let matches = state
        .services
        .orchestrator
        .find_similar(&address, query.top_k)
        .await
        .map_err(|e| ApiFailure::from_app(&e, start))?;

    Ok(Json(ApiResponse::success(
        SimilarData {
            contract_address: address,
            matches,
        },
        start,
    )))
}

// ============================================
// Stats
// ============================================

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatsData>> {
    let start = Instant::now();

    let data = StatsData {
        telemetry: state.services.telemetry.get_stats(),
        engine_cache: state.services.engine.as_ref().map(|e| e.cache_stats()),
        uptime_seconds: state.uptime_seconds(),
    };

    Json(ApiResponse::success(data, start))
}
