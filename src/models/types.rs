//! Type definitions for the scan pipeline
//! Typed records passed across each stage boundary:
//! explorer data -> analyzer results -> aggregated verdict -> persisted record

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::models::errors::{AppError, AppResult};
use crate::utils::constants::{
    MIN_EXPLANATION_LEN, SAFE_THRESHOLD, WARNING_THRESHOLD,
};

// ============================================
// Risk Level
// ============================================

/// Discretized risk bucket, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Safe,
    Warning,
    Dangerous,
}

/// Boundary rule used when bucketing a score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdRule {
    /// `score <= 0.3` Safe, `score <= 0.7` Warning
    Inclusive,
    /// `score < 0.3` Safe, `score < 0.7` Warning
    Exclusive,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "Safe",
            RiskLevel::Warning => "Warning",
            RiskLevel::Dangerous => "Dangerous",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "✅",
            RiskLevel::Warning => "🟠",
            RiskLevel::Dangerous => "🔴",
        }
    }

    /// Bucket a score in [0, 1] under the given boundary rule
    pub fn classify(score: f64, rule: ThresholdRule) -> Self {
        let (safe, warning) = match rule {
            ThresholdRule::Inclusive => (score <= SAFE_THRESHOLD, score <= WARNING_THRESHOLD),
            ThresholdRule::Exclusive => (score < SAFE_THRESHOLD, score < WARNING_THRESHOLD),
        };
        if safe {
            RiskLevel::Safe
        } else if warning {
            RiskLevel::Warning
        } else {
            RiskLevel::Dangerous
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(RiskLevel::Safe),
            "warning" => Ok(RiskLevel::Warning),
            "dangerous" => Ok(RiskLevel::Dangerous),
            other => Err(AppError::invalid_output(format!("Unknown risk level: {}", other))),
        }
    }
}

// ============================================
// Contract data
// ============================================

/// Input unit to analysis. Built once per scan, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSnapshot {
    /// Lowercase `0x`-prefixed address
    pub address: String,
    pub source_code: Option<String>,
    pub bytecode: Option<String>,
    pub is_proxy: bool,
}

impl ContractSnapshot {
    pub fn new(
        address: &str,
        source_code: Option<String>,
        bytecode: Option<String>,
        is_proxy: bool,
    ) -> Self {
        Self {
            address: address.to_lowercase(),
            source_code,
            bytecode,
            is_proxy,
        }
    }
}

/// Verified source as returned by the explorer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source_code: String,
    pub contract_name: String,
    pub compiler_version: String,
    pub verified: bool,
    pub optimization_used: bool,
    pub runs: u64,
    pub is_proxy: bool,
    pub implementation: Option<String>,
    /// Raw `Library` field (linked libraries), empty when none
    pub library: Option<String>,
    pub license: Option<String>,
    pub evm_version: Option<String>,
}

/// Normalized contract metadata carried through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractMetadata {
    pub contract_address: String,
    pub contract_name: String,
    pub compiler_version: String,
    pub optimization_used: bool,
    pub runs: u64,
    pub verified: bool,
    pub is_proxy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
    pub source_code_length: usize,
    pub library_usage: bool,
    pub has_comments: bool,
    /// Explorer-sourced key/value metadata without a dedicated field
    #[serde(default)]
    pub additional_metadata: BTreeMap<String, String>,
}

impl ContractMetadata {
    /// Minimal metadata for a contract without published source
    pub fn unverified(address: &str) -> Self {
        Self {
            contract_address: address.to_lowercase(),
            contract_name: "Unverified Contract".to_string(),
            compiler_version: "Unknown".to_string(),
            optimization_used: false,
            runs: 0,
            verified: false,
            is_proxy: false,
            implementation: None,
            source_code_length: 0,
            library_usage: false,
            has_comments: false,
            additional_metadata: BTreeMap::new(),
        }
    }

    pub fn from_source(address: &str, info: &SourceInfo) -> Self {
        let src = &info.source_code;
        let library_usage = info.library.as_deref().map(|l| !l.trim().is_empty()).unwrap_or(false)
            || src.contains("library ")
            || src.contains("using ");

        let mut additional_metadata = BTreeMap::new();
        if let Some(license) = info.license.as_ref().filter(|l| !l.is_empty()) {
            additional_metadata.insert("license".to_string(), license.clone());
        }
        if let Some(evm) = info.evm_version.as_ref().filter(|v| !v.is_empty()) {
            additional_metadata.insert("evm_version".to_string(), evm.clone());
        }

        Self {
            contract_address: address.to_lowercase(),
            contract_name: if info.contract_name.is_empty() {
                "Unknown".to_string()
            } else {
                info.contract_name.clone()
            },
            compiler_version: if info.compiler_version.is_empty() {
                "Unknown".to_string()
            } else {
                info.compiler_version.clone()
            },
            optimization_used: info.optimization_used,
            runs: info.runs,
            verified: info.verified,
            is_proxy: info.is_proxy,
            implementation: info.implementation.clone(),
            source_code_length: src.len(),
            library_usage,
            has_comments: src.contains("//") || src.contains("/*"),
            additional_metadata,
        }
    }
}

// ============================================
// Analyzer results
// ============================================

/// Unnamed result of one analyzer (engine model or remote AI service)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub risk_score: f64,
    pub confidence: f64,
    pub explanation: String,
    #[serde(default)]
    pub detected_issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub processing_time_ms: u64,
}

impl ModelResult {
    /// Engine-model fallback naming the failure reason
    pub fn fallback(reason: &str) -> Self {
        Self {
            risk_score: 0.5,
            confidence: 0.2,
            explanation: format!("Fallback analysis: {}", reason),
            detected_issues: vec![format!("Analysis limited: {}", reason)],
            recommendations: vec!["Retry analysis or perform manual review".to_string()],
            processing_time_ms: 0,
        }
    }

    /// Substituted when an AI service errors, panics or times out
    pub fn service_failure(reason: &str) -> Self {
        Self {
            risk_score: 0.5,
            confidence: 0.1,
            explanation: format!("Analysis failed: {}", reason),
            detected_issues: vec!["AI service unavailable".to_string()],
            recommendations: vec!["Retry analysis or use alternative service".to_string()],
            processing_time_ms: 0,
        }
    }

    /// Substituted when a service cannot read bytecode and no source exists
    pub fn bytecode_unsupported() -> Self {
        Self {
            risk_score: 0.5,
            confidence: 0.3,
            explanation: "Analysis based on bytecode only".to_string(),
            detected_issues: vec!["Unverified contract - limited analysis".to_string()],
            recommendations: vec![
                "Verify contract source code for comprehensive analysis".to_string(),
            ],
            processing_time_ms: 0,
        }
    }

    /// Substituted when neither source nor bytecode is available
    pub fn no_data() -> Self {
        Self {
            risk_score: 0.7,
            confidence: 0.1,
            explanation: "No contract data available for analysis".to_string(),
            detected_issues: vec!["Contract data unavailable".to_string()],
            recommendations: vec!["Check contract address and blockchain explorer".to_string()],
            processing_time_ms: 0,
        }
    }
}

/// One named analyzer verdict, as consumed by the aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub model_name: String,
    pub risk_score: f64,
    pub confidence: f64,
    pub explanation: String,
    pub detected_issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ModelOutput {
    pub fn from_result(model_name: impl Into<String>, result: &ModelResult) -> Self {
        Self {
            model_name: model_name.into(),
            risk_score: result.risk_score,
            confidence: result.confidence,
            explanation: result.explanation.clone(),
            detected_issues: result.detected_issues.clone(),
            recommendations: result.recommendations.clone(),
        }
    }

    /// Reject outputs outside the accepted ranges.
    /// Scores and confidences must lie in [0, 1]; NaN never passes.
    pub fn validate(&self) -> AppResult<()> {
        if !(0.0..=1.0).contains(&self.risk_score) {
            return Err(AppError::invalid_output(format!(
                "{}: risk_score {} outside [0, 1]",
                self.model_name, self.risk_score
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(AppError::invalid_output(format!(
                "{}: confidence {} outside [0, 1]",
                self.model_name, self.confidence
            )));
        }
        if self.explanation.trim().chars().count() < MIN_EXPLANATION_LEN {
            return Err(AppError::invalid_output(format!(
                "{}: explanation shorter than {} characters",
                self.model_name, MIN_EXPLANATION_LEN
            )));
        }
        Ok(())
    }
}

/// The scan verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub final_risk_level: RiskLevel,
    pub final_risk_score: f64,
    pub confidence: f64,
    pub explanation: String,
    pub detected_issues: Vec<String>,
    pub recommendations: Vec<String>,
    /// model name -> normalized contribution (sums to 1 when any is nonzero)
    pub model_contributions: BTreeMap<String, f64>,
}

impl AggregatedResult {
    /// Result used when there is nothing to aggregate
    pub fn no_analysis() -> Self {
        Self {
            final_risk_level: RiskLevel::Warning,
            final_risk_score: 0.5,
            confidence: 0.3,
            explanation: "No AI model analysis available. Manual review recommended.".to_string(),
            detected_issues: vec!["No analysis performed".to_string()],
            recommendations: vec!["Perform comprehensive security analysis".to_string()],
            model_contributions: BTreeMap::new(),
        }
    }

    /// Result substituted when aggregation itself fails
    pub fn aggregation_fallback(reason: &str) -> Self {
        Self {
            final_risk_level: RiskLevel::Warning,
            final_risk_score: 0.5,
            confidence: 0.1,
            explanation: format!("Aggregation failed: {}. Manual review recommended.", reason),
            detected_issues: vec!["Aggregation unavailable".to_string()],
            recommendations: vec!["Perform manual security review".to_string()],
            model_contributions: BTreeMap::new(),
        }
    }
}

// ============================================
// Analyzer service input
// ============================================

/// What an AI service receives. At least one of source/bytecode is normally set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub address: String,
    pub source_code: Option<String>,
    pub bytecode: Option<String>,
    pub is_proxy: bool,
}

impl AnalysisInput {
    pub fn with_source(address: &str, source: &str, is_proxy: bool) -> Self {
        Self {
            address: address.to_string(),
            source_code: Some(source.to_string()),
            bytecode: None,
            is_proxy,
        }
    }

    pub fn with_bytecode(address: &str, bytecode: &str, is_proxy: bool) -> Self {
        Self {
            address: address.to_string(),
            source_code: None,
            bytecode: Some(bytecode.to_string()),
            is_proxy,
        }
    }

    pub fn snapshot(&self) -> ContractSnapshot {
        ContractSnapshot::new(
            &self.address,
            self.source_code.clone(),
            self.bytecode.clone(),
            self.is_proxy,
        )
    }
}

// ============================================
// Scan envelope
// ============================================

/// Orchestrator output. Always returned, never thrown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub contract_address: String,
    pub source_code: Option<String>,
    pub bytecode: Option<String>,
    pub normalized_metadata: Option<ContractMetadata>,
    /// model name -> raw result
    pub ai_outputs: BTreeMap<String, ModelResult>,
    pub final_risk_score: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub explanation: Option<String>,
    pub aggregated: Option<AggregatedResult>,
    pub embedding_stored: bool,
    pub log_saved: bool,
    /// Non-fatal problems recovered during the scan
    #[serde(default)]
    pub warnings: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
    pub started_at: i64,
    pub duration_ms: u64,
}

impl ScanResult {
    pub fn started(scan_id: impl Into<String>, contract_address: &str) -> Self {
        Self {
            scan_id: scan_id.into(),
            contract_address: contract_address.to_string(),
            source_code: None,
            bytecode: None,
            normalized_metadata: None,
            ai_outputs: BTreeMap::new(),
            final_risk_score: None,
            risk_level: None,
            explanation: None,
            aggregated: None,
            embedding_stored: false,
            log_saved: false,
            warnings: Vec::new(),
            success: false,
            error: None,
            started_at: chrono::Utc::now().timestamp(),
            duration_ms: 0,
        }
    }

    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            contract_address: self.contract_address.clone(),
            verified: self
                .normalized_metadata
                .as_ref()
                .map(|m| m.verified)
                .unwrap_or(false),
            final_risk_score: self.final_risk_score,
            risk_level: self.risk_level,
            models_used: self.ai_outputs.keys().cloned().collect(),
            success: self.success,
            error: self.error.clone(),
        }
    }
}

/// Compact view of a scan for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub contract_address: String,
    pub verified: bool,
    pub final_risk_score: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub models_used: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
}

// ============================================
// Persistence records
// ============================================

/// Full analysis log row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub scan_id: String,
    pub contract_address: String,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub explanation: String,
    pub detected_issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub model_contributions: BTreeMap<String, f64>,
    pub metadata: Option<ContractMetadata>,
    pub embedding: Vec<f32>,
    /// Unix seconds
    pub created_at: i64,
}

/// One point on an address's risk timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskHistoryEntry {
    pub scan_id: String,
    pub contract_address: String,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub recorded_at: i64,
}

/// Vector-store similarity hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarContract {
    pub key: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(score: f64, confidence: f64, explanation: &str) -> ModelOutput {
        ModelOutput {
            model_name: "venice".to_string(),
            risk_score: score,
            confidence,
            explanation: explanation.to_string(),
            detected_issues: vec![],
            recommendations: vec![],
        }
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Safe < RiskLevel::Warning);
        assert!(RiskLevel::Warning < RiskLevel::Dangerous);
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(RiskLevel::classify(0.3, ThresholdRule::Inclusive), RiskLevel::Safe);
        assert_eq!(RiskLevel::classify(0.3, ThresholdRule::Exclusive), RiskLevel::Warning);
        assert_eq!(RiskLevel::classify(0.7, ThresholdRule::Inclusive), RiskLevel::Warning);
        assert_eq!(RiskLevel::classify(0.7, ThresholdRule::Exclusive), RiskLevel::Dangerous);
        assert_eq!(RiskLevel::classify(0.0, ThresholdRule::Exclusive), RiskLevel::Safe);
        assert_eq!(RiskLevel::classify(1.0, ThresholdRule::Inclusive), RiskLevel::Dangerous);
    }

    #[test]
    fn test_risk_level_parse() {
        assert_eq!("warning".parse::<RiskLevel>().unwrap(), RiskLevel::Warning);
        assert_eq!("Dangerous".parse::<RiskLevel>().unwrap(), RiskLevel::Dangerous);
        assert!("critical".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn test_snapshot_lowercases_address() {
        let snap = ContractSnapshot::new("0xABCDEF0000000000000000000000000000000001", None, None, false);
        assert_eq!(snap.address, "0xabcdef0000000000000000000000000000000001");
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(output(0.4, 0.9, "looks reasonable enough").validate().is_ok());
        assert!(output(1.2, 0.9, "looks reasonable enough").validate().is_err());
        assert!(output(0.4, -0.1, "looks reasonable enough").validate().is_err());
        assert!(output(f64::NAN, 0.5, "looks reasonable enough").validate().is_err());
        assert!(output(0.4, 0.5, "   too short  ").validate().is_err());
    }

    #[test]
    fn test_metadata_from_source() {
        let info = SourceInfo {
            source_code: "// SPDX\nlibrary SafeMath {}\ncontract Token {}".to_string(),
            contract_name: "Token".to_string(),
            compiler_version: "v0.8.19+commit.7dd6d404".to_string(),
            verified: true,
            optimization_used: true,
            runs: 200,
            license: Some("MIT".to_string()),
            ..Default::default()
        };
        let meta = ContractMetadata::from_source("0xAbC0000000000000000000000000000000000001", &info);
        assert!(meta.verified);
        assert!(meta.library_usage);
        assert!(meta.has_comments);
        assert_eq!(meta.source_code_length, info.source_code.len());
        assert_eq!(meta.additional_metadata.get("license").map(String::as_str), Some("MIT"));
        assert_eq!(meta.contract_address, "0xabc0000000000000000000000000000000000001");
    }

    #[test]
    fn test_unverified_metadata() {
        let meta = ContractMetadata::unverified("0xABC");
        assert!(!meta.verified);
        assert_eq!(meta.contract_name, "Unverified Contract");
        assert_eq!(meta.source_code_length, 0);
    }
}
