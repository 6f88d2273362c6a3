//! Scan Orchestrator
//!
//! Drives one scan end to end:
//!
//! ```text
//! address ─► fetch (source, else bytecode) ─► fan out to AI services
//!         ─► weighted aggregation ─► embedding → vector store
//!         ─► analysis log → database ─► ScanResult
//! ```
//!
//! `scan` never returns an error. Only a fetch that yields neither source nor
//! bytecode ends the scan with `success = false`; every later stage recovers
//! with a fallback and records a warning.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures_util::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tracing::{debug, error, info, warn};

use crate::core::aggregator::{AggregationStrategy, AiAggregator};
use crate::models::errors::{AppError, AppResult};
use crate::models::types::{
    AggregatedResult, AnalysisInput, AnalysisRecord, ContractMetadata, ModelOutput, ModelResult,
    RiskHistoryEntry, ScanResult, ScanSummary, SimilarContract,
};
use crate::providers::traits::{AiService, AnalysisRepository, ContractExplorer, VectorStore};
use crate::utils::constants::{is_empty_bytecode, DEFAULT_SERVICE_TIMEOUT_SECS};
use crate::utils::telemetry::ScanTelemetry;

/// What the fetch stage produced
#[derive(Debug, Clone)]
struct FetchedContract {
    source_code: Option<String>,
    bytecode: Option<String>,
    metadata: ContractMetadata,
}

/// Per-service call state before results are collected
enum Pending {
    /// Bytecode only and the service needs source
    Unsupported,
    /// Nothing to analyze
    NoData,
    Running(JoinHandle<Result<AppResult<ModelResult>, Elapsed>>),
}

/// Per-service outcome of the analyze stage
struct ServiceOutcome {
    name: String,
    result: ModelResult,
    fallback: bool,
}

pub struct ScanOrchestrator {
    explorer: Arc<dyn ContractExplorer>,
    services: Vec<Arc<dyn AiService>>,
    aggregator: Arc<AiAggregator>,
    vector_store: Option<Arc<dyn VectorStore>>,
    repository: Option<Arc<dyn AnalysisRepository>>,
    telemetry: Option<Arc<ScanTelemetry>>,
    service_timeout: Duration,
}

impl ScanOrchestrator {
    pub fn new(explorer: Arc<dyn ContractExplorer>, aggregator: Arc<AiAggregator>) -> Self {
        Self {
            explorer,
            services: Vec::new(),
            aggregator,
            vector_store: None,
            repository: None,
            telemetry: None,
            service_timeout: Duration::from_secs(DEFAULT_SERVICE_TIMEOUT_SECS),
        }
    }

    pub fn with_service(mut self, service: Arc<dyn AiService>) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_services(mut self, services: impl IntoIterator<Item = Arc<dyn AiService>>) -> Self {
        self.services.extend(services);
        self
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn AnalysisRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<ScanTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_service_timeout(mut self, timeout: Duration) -> Self {
        self.service_timeout = timeout;
        self
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn aggregator(&self) -> &Arc<AiAggregator> {
        &self.aggregator
    }

    // ============================================
    // Scan
    // ============================================

    /// Run the full pipeline for one address. Always returns a result.
    pub async fn scan(&self, address: &str) -> ScanResult {
        let start = Instant::now();
        let address = address.trim().to_lowercase();
        let scan_id = uuid::Uuid::new_v4().to_string();
        let mut result = ScanResult::started(&scan_id, &address);

        info!(scan_id = %scan_id, address = %address, "🔎 Scan started");

        // 1. Fetch
        let fetched = match self.fetch(&address, &mut result.warnings).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(scan_id = %scan_id, address = %address, error = %e, "❌ Scan failed at fetch");
                result.error = Some(format!("Scan failed: {}", e.message));
                return self.finish(result, start);
            }
        };
        result.source_code = fetched.source_code.clone();
        result.bytecode = fetched.bytecode.clone();
        result.normalized_metadata = Some(fetched.metadata.clone());

        // 2. Analyze
        let input = AnalysisInput {
            address: address.clone(),
            source_code: fetched.source_code.clone(),
            bytecode: fetched.bytecode.clone(),
            is_proxy: fetched.metadata.is_proxy,
        };
        for outcome in self.analyze_with_services(&input).await {
            if outcome.fallback {
                result
                    .warnings
                    .push(format!("{}: {}", outcome.name, outcome.result.explanation));
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record_fallback();
                }
            }
            result.ai_outputs.insert(outcome.name, outcome.result);
        }

        // 3. Aggregate
        let outputs = valid_outputs(&result.ai_outputs, &mut result.warnings);
        let verdict = match self
            .aggregator
            .aggregate(AggregationStrategy::WeightedByConfidence, &outputs)
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("⚠️ Aggregation failed for {}: {}", address, e);
                result.warnings.push(format!("aggregation: {}", e.message));
                AggregatedResult::aggregation_fallback(&e.message)
            }
        };
        result.final_risk_score = Some(verdict.final_risk_score);
        result.risk_level = Some(verdict.final_risk_level);
        result.explanation = Some(verdict.explanation.clone());

        // 4 + 5. Persist
        let embedding = AiAggregator::embedding_vector(&outputs, &fetched.metadata);
        let record = AnalysisRecord {
            scan_id: scan_id.clone(),
            contract_address: address.clone(),
            risk_score: verdict.final_risk_score,
            risk_level: verdict.final_risk_level,
            explanation: verdict.explanation.clone(),
            detected_issues: verdict.detected_issues.clone(),
            recommendations: verdict.recommendations.clone(),
            model_contributions: verdict.model_contributions.clone(),
            metadata: Some(fetched.metadata.clone()),
            embedding,
            created_at: chrono::Utc::now().timestamp(),
        };
        let (embedding_stored, log_saved, persist_warnings) = self.persist(record).await;
        result.embedding_stored = embedding_stored;
        result.log_saved = log_saved;
        result.warnings.extend(persist_warnings);

        result.aggregated = Some(verdict);
        result.success = true;

        info!(
            "{} Scan {} complete: {} ({:.2})",
            result.risk_level.map(|l| l.emoji()).unwrap_or("✅"),
            scan_id,
            result.risk_level.map(|l| l.as_str()).unwrap_or("Unknown"),
            result.final_risk_score.unwrap_or_default()
        );
        self.finish(result, start)
    }

    /// Scan and reduce to a summary
    pub async fn get_scan_summary(&self, address: &str) -> ScanSummary {
        self.scan(address).await.summary()
    }

    fn finish(&self, mut result: ScanResult, start: Instant) -> ScanResult {
        result.duration_ms = start.elapsed().as_millis() as u64;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_scan(&result);
        }
        result
    }

    // ============================================
    // Stages
    // ============================================

    async fn fetch(&self, address: &str, warnings: &mut Vec<String>) -> AppResult<FetchedContract> {
        let source = match self.explorer.get_source(address).await {
            Ok(source) => source.filter(|s| !s.source_code.trim().is_empty()),
            Err(e) => {
                warn!("⚠️ Source lookup failed for {}: {}", address, e);
                warnings.push(format!("explorer source: {}", e.message));
                None
            }
        };

        if let Some(info) = source {
            debug!("📄 {} is verified ({})", address, info.contract_name);
            let metadata = ContractMetadata::from_source(address, &info);
            return Ok(FetchedContract {
                source_code: Some(info.source_code),
                bytecode: None,
                metadata,
            });
        }

        let bytecode = match self.explorer.get_bytecode(address).await {
            Ok(code) => code.filter(|c| !is_empty_bytecode(c)),
            Err(e) => {
                warn!("⚠️ Bytecode lookup failed for {}: {}", address, e);
                warnings.push(format!("explorer bytecode: {}", e.message));
                None
            }
        };

        match bytecode {
            Some(code) => Ok(FetchedContract {
                source_code: None,
                bytecode: Some(code),
                metadata: ContractMetadata::unverified(address),
            }),
            None => Err(AppError::explorer_unavailable(
                "no contract data available (neither verified source nor bytecode)",
            )),
        }
    }

    /// Call every service concurrently, each in its own task under `service_timeout`
    async fn analyze_with_services(&self, input: &AnalysisInput) -> Vec<ServiceOutcome> {
        let has_source = input
            .source_code
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        let has_bytecode = input.bytecode.as_deref().map(|b| !is_empty_bytecode(b)).unwrap_or(false);

        let mut handles = Vec::with_capacity(self.services.len());
        for service in &self.services {
            let name = service.name().to_string();

            let call_input = if has_source {
                AnalysisInput {
                    bytecode: None,
                    ..input.clone()
                }
            } else if has_bytecode && service.supports_bytecode() {
                AnalysisInput {
                    source_code: None,
                    ..input.clone()
                }
            } else if has_bytecode {
                handles.push((name, Pending::Unsupported));
                continue;
            } else {
                handles.push((name, Pending::NoData));
                continue;
            };

            let service = Arc::clone(service);
            let timeout = self.service_timeout;
            let handle = tokio::spawn(async move {
                tokio::time::timeout(timeout, service.analyze(&call_input)).await
            });
            handles.push((name, Pending::Running(handle)));
        }

        let timeout_ms = self.service_timeout.as_millis();
        join_all(handles.into_iter().map(|(name, slot)| async move {
            let (result, fallback) = match slot {
                Pending::Unsupported => (ModelResult::bytecode_unsupported(), false),
                Pending::NoData => (ModelResult::no_data(), true),
                Pending::Running(handle) => match handle.await {
                    Ok(Ok(Ok(result))) => (result, false),
                    Ok(Ok(Err(e))) => {
                        warn!(model = %name, error = %e, "⚠️ AI analysis failed");
                        (ModelResult::service_failure(&e.message), true)
                    }
                    Ok(Err(_)) => {
                        warn!(model = %name, timeout_ms = %timeout_ms, "⏱️ AI analysis timed out");
                        let reason = format!("timed out after {}ms", timeout_ms);
                        (ModelResult::service_failure(&reason), true)
                    }
                    Err(join_err) => {
                        error!(model = %name, error = %join_err, "❌ AI service task aborted");
                        (ModelResult::service_failure("service task aborted"), true)
                    }
                },
            };
            ServiceOutcome {
                name,
                result,
                fallback,
            }
        }))
        .await
    }

    /// Store embedding and analysis log. Runs in its own task so a caller
    /// dropping the scan future does not cut the writes short.
    async fn persist(&self, record: AnalysisRecord) -> (bool, bool, Vec<String>) {
        let vector_store = self.vector_store.clone();
        let repository = self.repository.clone();

        let task = tokio::spawn(async move {
            let mut warnings = Vec::new();

            let embedding_stored = match &vector_store {
                Some(store) => {
                    let metadata = vector_metadata(&record);
                    match store
                        .store(&record.contract_address, &record.embedding, metadata)
                        .await
                    {
                        Ok(stored) => stored,
                        Err(e) => {
                            warn!("⚠️ Embedding store failed for {}: {}", record.contract_address, e);
                            warnings.push(format!("vector store: {}", e.message));
                            false
                        }
                    }
                }
                None => false,
            };

            let log_saved = match &repository {
                Some(repo) => match repo.save_analysis(&record).await {
                    Ok(saved) => saved,
                    Err(e) => {
                        warn!("⚠️ Analysis log save failed for {}: {}", record.scan_id, e);
                        warnings.push(format!("database: {}", e.message));
                        false
                    }
                },
                None => false,
            };

            (embedding_stored, log_saved, warnings)
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("❌ Persistence task aborted: {}", e);
                (false, false, vec![format!("persistence: {}", e)])
            }
        }
    }

    // ============================================
    // Read paths
    // ============================================

    /// Risk timeline for an address from the analysis log
    pub async fn history(&self, address: &str, days: u32) -> AppResult<Vec<RiskHistoryEntry>> {
        let repo = self
            .repository
            .as_ref()
            .ok_or_else(|| AppError::database("analysis database not configured"))?;
        repo.get_history(&address.to_lowercase(), days).await
    }

    pub async fn get_scan(&self, scan_id: &str) -> AppResult<Option<AnalysisRecord>> {
        let repo = self
            .repository
            .as_ref()
            .ok_or_else(|| AppError::database("analysis database not configured"))?;
        repo.get_by_scan_id(scan_id).await
    }

    /// Contracts whose stored embedding is closest to `address`'s
    pub async fn find_similar(&self, address: &str, top_k: usize) -> AppResult<Vec<SimilarContract>> {
        let store = self
            .vector_store
            .as_ref()
            .ok_or_else(|| AppError::vector_store("vector store not configured"))?;
        let key = address.to_lowercase();
        let vector = store
            .fetch(&key)
            .await?
            .ok_or_else(|| AppError::not_found(format!("no embedding stored for {}", key)))?;

        let hits = store.query_similar(&vector, top_k + 1).await?;
        Ok(hits.into_iter().filter(|h| h.key != key).take(top_k).collect())
    }
}

/// Convert raw service results into validated outputs, dropping invalid ones
fn valid_outputs(
    ai_outputs: &BTreeMap<String, ModelResult>,
    warnings: &mut Vec<String>,
) -> Vec<ModelOutput> {
    ai_outputs
        .iter()
        .filter_map(|(name, result)| {
            let output = ModelOutput::from_result(name.clone(), result);
            match output.validate() {
                Ok(()) => Some(output),
                Err(e) => {
                    warn!("⚠️ Discarding invalid output from {}: {}", name, e);
                    warnings.push(format!("{}: {}", name, e.message));
                    None
                }
            }
        })
        .collect()
}

fn vector_metadata(record: &AnalysisRecord) -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();
    metadata.insert("contract_address".to_string(), Value::from(record.contract_address.clone()));
    metadata.insert("scan_id".to_string(), Value::from(record.scan_id.clone()));
    metadata.insert("risk_score".to_string(), Value::from(record.risk_score));
    metadata.insert("risk_level".to_string(), Value::from(record.risk_level.as_str()));
    if let Some(meta) = &record.metadata {
        metadata.insert("contract_name".to_string(), Value::from(meta.contract_name.clone()));
        metadata.insert("verified".to_string(), Value::from(meta.verified));
        metadata.insert("is_proxy".to_string(), Value::from(meta.is_proxy));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::{RiskLevel, SourceInfo};
    use async_trait::async_trait;

    const ADDR: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    struct StaticExplorer {
        source: Option<&'static str>,
        bytecode: Option<&'static str>,
    }

    #[async_trait]
    impl ContractExplorer for StaticExplorer {
        async fn get_source(&self, _address: &str) -> AppResult<Option<SourceInfo>> {
            Ok(self.source.map(|s| SourceInfo {
                source_code: s.to_string(),
                contract_name: "Vault".to_string(),
                verified: true,
                ..Default::default()
            }))
        }

        async fn get_bytecode(&self, _address: &str) -> AppResult<Option<String>> {
            Ok(self.bytecode.map(String::from))
        }
    }

    struct FixedService {
        name: &'static str,
        bytecode: bool,
        score: f64,
    }

    #[async_trait]
    impl AiService for FixedService {
        fn name(&self) -> &str {
            self.name
        }

        fn supports_bytecode(&self) -> bool {
            self.bytecode
        }

        async fn analyze(&self, _input: &AnalysisInput) -> AppResult<ModelResult> {
            Ok(ModelResult {
                risk_score: self.score,
                confidence: 1.0,
                explanation: format!("{} analysis finished", self.name),
                detected_issues: vec!["Shared issue".to_string()],
                recommendations: vec![],
                processing_time_ms: 1,
            })
        }
    }

    struct SleepyService;

    #[async_trait]
    impl AiService for SleepyService {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn analyze(&self, _input: &AnalysisInput) -> AppResult<ModelResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ModelResult::no_data())
        }
    }

    fn orchestrator(explorer: StaticExplorer) -> ScanOrchestrator {
        ScanOrchestrator::new(Arc::new(explorer), Arc::new(AiAggregator::default()))
    }

    #[tokio::test]
    async fn test_scan_normalizes_address_and_ids() {
        let orch = orchestrator(StaticExplorer {
            source: Some("contract Vault {}"),
            bytecode: None,
        })
        .with_service(Arc::new(FixedService {
            name: "venice",
            bytecode: false,
            score: 0.2,
        }));

        let a = orch.scan(ADDR).await;
        let b = orch.scan(ADDR).await;
        assert!(a.success && b.success);
        assert_eq!(a.contract_address, ADDR.to_lowercase());
        assert_ne!(a.scan_id, b.scan_id);
        assert_eq!(a.risk_level, Some(RiskLevel::Safe));
        assert!(a.normalized_metadata.unwrap().verified);
    }

    #[tokio::test]
    async fn test_bytecode_only_routing() {
        let orch = orchestrator(StaticExplorer {
            source: None,
            bytecode: Some("0x6080604052"),
        })
        .with_service(Arc::new(FixedService {
            name: "agentkit",
            bytecode: true,
            score: 0.9,
        }))
        .with_service(Arc::new(FixedService {
            name: "venice",
            bytecode: false,
            score: 0.1,
        }));

        let result = orch.scan(ADDR).await;
        assert!(result.success);
        assert_eq!(result.ai_outputs["agentkit"].risk_score, 0.9);
        assert_eq!(result.ai_outputs["venice"], ModelResult::bytecode_unsupported());
        assert_eq!(
            result.normalized_metadata.unwrap().contract_name,
            "Unverified Contract"
        );
    }

    #[tokio::test]
    async fn test_no_data_is_terminal() {
        let orch = orchestrator(StaticExplorer {
            source: None,
            bytecode: Some("0x"),
        })
        .with_service(Arc::new(FixedService {
            name: "venice",
            bytecode: false,
            score: 0.1,
        }));

        let result = orch.scan(ADDR).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no contract data"));
        assert!(result.ai_outputs.is_empty());
        assert!(result.final_risk_score.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_timeout_falls_back() {
        let orch = orchestrator(StaticExplorer {
            source: Some("contract Vault {}"),
            bytecode: None,
        })
        .with_service(Arc::new(SleepyService))
        .with_service_timeout(Duration::from_millis(50));

        let result = orch.scan(ADDR).await;
        assert!(result.success);
        let sleepy = &result.ai_outputs["sleepy"];
        assert_eq!(sleepy.risk_score, 0.5);
        assert_eq!(sleepy.confidence, 0.1);
        assert!(sleepy.explanation.contains("timed out"));
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_no_services_gives_default_verdict() {
        let orch = orchestrator(StaticExplorer {
            source: Some("contract Vault {}"),
            bytecode: None,
        });
        let result = orch.scan(ADDR).await;
        assert!(result.success);
        assert_eq!(result.final_risk_score, Some(0.5));
        assert_eq!(result.risk_level, Some(RiskLevel::Warning));
        assert!(!result.embedding_stored);
        assert!(!result.log_saved);
    }

    #[tokio::test]
    async fn test_summary() {
        let orch = orchestrator(StaticExplorer {
            source: Some("contract Vault {}"),
            bytecode: None,
        })
        .with_service(Arc::new(FixedService {
            name: "local_llm",
            bytecode: false,
            score: 0.8,
        }));
        let summary = orch.get_scan_summary(ADDR).await;
        assert!(summary.verified);
        assert_eq!(summary.models_used, vec!["local_llm".to_string()]);
        assert_eq!(summary.risk_level, Some(RiskLevel::Dangerous));
    }

    #[tokio::test]
    async fn test_read_paths_need_collaborators() {
        let orch = orchestrator(StaticExplorer {
            source: None,
            bytecode: None,
        });
        assert!(orch.history(ADDR, 30).await.is_err());
        assert!(orch.get_scan("x").await.is_err());
        assert!(orch.find_similar(ADDR, 5).await.is_err());
    }
}
