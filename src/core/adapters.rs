//! Engine analyzer models
//!
//! Three independent heuristics over a [`ContractSnapshot`]:
//! - source code: flags `selfdestruct` / `delegatecall`
//! - bytecode: size heuristic, always marks the analysis as bytecode-only
//! - behavior: proxy detection
//!
//! A model returns `Err` when its required input is absent; the engine turns
//! that (and any timeout) into [`ModelResult::fallback`].

use async_trait::async_trait;
use std::time::Instant;

use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::models::types::{ContractSnapshot, ModelResult};
use crate::utils::constants::{
    is_empty_bytecode, LARGE_BYTECODE_HEX_LEN, SLOT_BEHAVIOR, SLOT_BYTECODE, SLOT_SOURCE,
};

/// One engine model
#[async_trait]
pub trait ContractModel: Send + Sync {
    /// Slot name in the fixed three-model aggregation
    fn slot(&self) -> &'static str;

    async fn analyze(&self, snapshot: &ContractSnapshot) -> AppResult<ModelResult>;
}

/// Run `model`, substituting the fallback result on error
pub async fn analyze_or_fallback(model: &dyn ContractModel, snapshot: &ContractSnapshot) -> ModelResult {
    match model.analyze(snapshot).await {
        Ok(result) => result,
        Err(e) => ModelResult::fallback(&fallback_reason(model.slot(), &e)),
    }
}

/// Reason string for a failed model
pub fn fallback_reason(slot: &str, err: &AppError) -> String {
    match err.code {
        ErrorCode::AnalyzerMissingInput => err.message.clone(),
        ErrorCode::AnalyzerTimeout if slot == SLOT_SOURCE => "source_code_timeout".to_string(),
        ErrorCode::AnalyzerTimeout => format!("{}_timeout", slot),
        _ => format!("{}_error: {}", slot, err.message),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// ============================================
// Source code
// ============================================

#[derive(Debug, Default, Clone, Copy)]
pub struct SourceCodeModel;

#[async_trait]
impl ContractModel for SourceCodeModel {
    fn slot(&self) -> &'static str {
        SLOT_SOURCE
    }

    async fn analyze(&self, snapshot: &ContractSnapshot) -> AppResult<ModelResult> {
        let start = Instant::now();
        let source = snapshot
            .source_code
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::missing_input("no_source_code"))?;

        let lowered = source.to_lowercase();
        let mut risk_score: f64 = 0.2;
        let mut issues = Vec::new();
        let mut recommendations = vec!["No critical issues detected".to_string()];

        if lowered.contains("selfdestruct") {
            risk_score = 0.7;
            issues.push("Contains selfdestruct function".to_string());
            recommendations.push("Review selfdestruct usage carefully".to_string());
        }
        if lowered.contains("delegatecall") {
            risk_score = risk_score.max(0.6);
            issues.push("Uses delegatecall".to_string());
            recommendations.push("Audit delegatecall usage for security".to_string());
        }

        Ok(ModelResult {
            risk_score,
            confidence: 0.8,
            explanation: format!("Source code analysis: {} potential issues found", issues.len()),
            detected_issues: issues,
            recommendations,
            processing_time_ms: elapsed_ms(start),
        })
    }
}

// ============================================
// Bytecode
// ============================================

#[derive(Debug, Default, Clone, Copy)]
pub struct BytecodeModel;

#[async_trait]
impl ContractModel for BytecodeModel {
    fn slot(&self) -> &'static str {
        SLOT_BYTECODE
    }

    async fn analyze(&self, snapshot: &ContractSnapshot) -> AppResult<ModelResult> {
        let start = Instant::now();
        let bytecode = snapshot
            .bytecode
            .as_deref()
            .filter(|b| !is_empty_bytecode(b))
            .ok_or_else(|| AppError::missing_input("no_bytecode"))?;

        let mut risk_score = 0.3;
        let mut issues = vec!["Analysis based on bytecode only".to_string()];
        let recommendations =
            vec!["Verify contract source code for comprehensive analysis".to_string()];

        let hex_len = bytecode.trim_start_matches("0x").len();
        if hex_len > LARGE_BYTECODE_HEX_LEN {
            risk_score = 0.4;
            issues.push("Large contract size - increased attack surface".to_string());
        }

        Ok(ModelResult {
            risk_score,
            confidence: 0.5,
            explanation: format!("Bytecode analysis: contract size {} hex characters", hex_len),
            detected_issues: issues,
            recommendations,
            processing_time_ms: elapsed_ms(start),
        })
    }
}

// ============================================
// Behavior
// ============================================

#[derive(Debug, Default, Clone, Copy)]
pub struct BehaviorModel;

#[async_trait]
impl ContractModel for BehaviorModel {
    fn slot(&self) -> &'static str {
        SLOT_BEHAVIOR
    }

    async fn analyze(&self, snapshot: &ContractSnapshot) -> AppResult<ModelResult> {
        let start = Instant::now();
        let mut result = ModelResult {
            risk_score: 0.25,
            confidence: 0.7,
            explanation: "Behavior analysis: standard contract patterns".to_string(),
            detected_issues: Vec::new(),
            recommendations: vec!["Standard contract behavior patterns detected".to_string()],
            processing_time_ms: 0,
        };

        if snapshot.is_proxy {
            result.risk_score = 0.5;
            result.explanation = "Behavior analysis: proxy contract detected".to_string();
            result.detected_issues.push("Proxy contract detected".to_string());
            result
                .recommendations
                .push("Review proxy implementation for upgrade safety".to_string());
        }

        result.processing_time_ms = elapsed_ms(start);
        Ok(result)
    }
}
