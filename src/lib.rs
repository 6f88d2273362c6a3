//! Scathat Scanner Library
//!
//! Smart-contract risk scanner:
//! - fetches verified source (or bytecode) from an Etherscan-compatible explorer
//! - fans the contract out to remote AI services and a local heuristic engine
//! - merges verdicts into one Safe / Warning / Dangerous risk level
//! - stores an embedding for similarity search and an analysis log for history
//! - optionally writes the verdict to an on-chain results registry

pub mod api;
pub mod core;
pub mod models;
pub mod providers;
pub mod utils;

pub use crate::core::{
    AggregationStrategy, AiAggregator, AiEngine, EngineAnalysis, ScanOrchestrator, ScannerServices,
};
pub use models::{
    AggregatedResult, AnalysisInput, AnalysisRecord, AppError, AppResult, ContractMetadata,
    ContractSnapshot, ErrorCode, ModelOutput, ModelResult, RiskLevel, ScanResult, ScanSummary,
    ScannerConfig,
};
pub use utils::{CacheStats, ScanTelemetry, TelemetryStats, TtlCache};
