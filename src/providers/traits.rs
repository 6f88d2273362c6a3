//! Collaborator interfaces consumed by the scan pipeline.
//!
//! Concrete HTTP / SQLite / chain implementations live next to this file;
//! tests substitute in-process fakes.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::models::errors::AppResult;
use crate::models::types::{
    AnalysisInput, AnalysisRecord, ModelResult, RiskHistoryEntry, SimilarContract, SourceInfo,
};

/// Block explorer (Etherscan-compatible)
#[async_trait]
pub trait ContractExplorer: Send + Sync {
    /// `Ok(None)` when the explorer has no verified source for the address
    async fn get_source(&self, address: &str) -> AppResult<Option<SourceInfo>>;

    /// `Ok(None)` when there is no code at the address
    async fn get_bytecode(&self, address: &str) -> AppResult<Option<String>>;
}

/// A named AI analyzer
#[async_trait]
pub trait AiService: Send + Sync {
    /// Unique name, used as the aggregation key
    fn name(&self) -> &str;

    /// Whether the service accepts bytecode-only input
    fn supports_bytecode(&self) -> bool {
        false
    }

    /// Analyze whatever the input carries (source, bytecode, or both)
    async fn analyze(&self, input: &AnalysisInput) -> AppResult<ModelResult>;
}

/// On-chain results registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Registry address and signer are both configured
    fn can_write(&self) -> bool;

    /// Transaction hash, or `None` when writes are not configured
    async fn write_score(&self, address: &str, score: &str) -> AppResult<Option<String>>;

    /// Stored score string, or `None` when nothing is recorded
    async fn read_score(&self, address: &str) -> AppResult<Option<String>>;
}

/// Embedding store keyed by lowercase contract address
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn store(
        &self,
        key: &str,
        vector: &[f32],
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> AppResult<bool>;

    async fn fetch(&self, key: &str) -> AppResult<Option<Vec<f32>>>;

    async fn query_similar(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<SimilarContract>>;
}

/// Analysis log persistence
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    async fn save_analysis(&self, record: &AnalysisRecord) -> AppResult<bool>;

    /// Entries for `address` recorded within the last `days` days, newest first
    async fn get_history(&self, address: &str, days: u32) -> AppResult<Vec<RiskHistoryEntry>>;

    async fn get_recent(&self, limit: usize) -> AppResult<Vec<AnalysisRecord>>;

    async fn get_by_scan_id(&self, scan_id: &str) -> AppResult<Option<AnalysisRecord>>;
}
