//! AI Engine
//!
//! Runs the source, bytecode and behavior models concurrently under one
//! shared deadline, merges them with the fixed three-model strategy and
//! caches the verdict by content hash.
//!
//! Flow:
//! 1. Cache lookup (sha256 over source[..1000] | bytecode[..100] | address)
//! 2. Fan out to the three models; any model unfinished at the deadline
//!    gets a timeout fallback, finished models keep their real result
//! 3. Fixed-weight aggregation (0.5 / 0.3 / 0.2, exclusive thresholds)
//! 4. Cache store (skipped when any model timed out)
//!
//! The engine is also exposed to the orchestrator as the `heuristics` service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::adapters::{
    fallback_reason, BehaviorModel, BytecodeModel, ContractModel, SourceCodeModel,
};
use crate::core::aggregator::{AggregationStrategy, AiAggregator};
use crate::models::config::EngineConfig;
use crate::models::errors::{AppError, AppResult};
use crate::models::types::{
    AggregatedResult, AnalysisInput, ContractSnapshot, ModelOutput, ModelResult, RiskLevel,
    ThresholdRule,
};
use crate::providers::traits::AiService;
use crate::utils::cache::{CacheStats, TtlCache};
use crate::utils::constants::{CACHE_KEY_BYTECODE_PREFIX, CACHE_KEY_SOURCE_PREFIX};

/// Name under which the engine registers as an AI service
pub const ENGINE_SERVICE_NAME: &str = "heuristics";

/// Engine verdict plus the per-slot results that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineAnalysis {
    pub verdict: AggregatedResult,
    /// slot name -> model result (real or fallback)
    pub slots: BTreeMap<String, ModelResult>,
    /// Slots replaced because the deadline passed
    pub timed_out: Vec<String>,
    pub processing_time_ms: u64,
}

impl EngineAnalysis {
    /// Flatten into the shape every AI service returns
    pub fn to_model_result(&self) -> ModelResult {
        ModelResult {
            risk_score: self.verdict.final_risk_score,
            confidence: self.verdict.confidence,
            explanation: self.verdict.explanation.clone(),
            detected_issues: self.verdict.detected_issues.clone(),
            recommendations: self.verdict.recommendations.clone(),
            processing_time_ms: self.processing_time_ms,
        }
    }
}

pub struct AiEngine {
    source: Arc<dyn ContractModel>,
    bytecode: Arc<dyn ContractModel>,
    behavior: Arc<dyn ContractModel>,
    aggregator: Arc<AiAggregator>,
    cache: TtlCache<EngineAnalysis>,
    model_timeout: Duration,
}

impl AiEngine {
    pub fn new(config: &EngineConfig, aggregator: Arc<AiAggregator>) -> Self {
        info!(
            "🧠 AI Engine initialized (cache: {} entries / {}s TTL, deadline: {}ms)",
            config.cache_max_size,
            config.cache_ttl.as_secs(),
            config.model_timeout.as_millis()
        );
        Self {
            source: Arc::new(SourceCodeModel),
            bytecode: Arc::new(BytecodeModel),
            behavior: Arc::new(BehaviorModel),
            aggregator,
            cache: TtlCache::new(config.cache_max_size, config.cache_ttl),
            model_timeout: config.model_timeout,
        }
    }

    /// Replace the three models (custom heuristics, tests)
    pub fn with_models(
        mut self,
        source: Arc<dyn ContractModel>,
        bytecode: Arc<dyn ContractModel>,
        behavior: Arc<dyn ContractModel>,
    ) -> Self {
        self.source = source;
        self.bytecode = bytecode;
        self.behavior = behavior;
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Periodic maintenance hook
    pub fn cleanup_cache(&self) -> usize {
        self.cache.cleanup_expired()
    }

    /// Analyze one snapshot with all three models
    pub async fn analyze(&self, snapshot: &ContractSnapshot) -> EngineAnalysis {
        let start = Instant::now();
        let key = cache_key(snapshot);

        if let Some(hit) = self.cache.get(&key) {
            info!("✅ CACHE HIT: engine analysis for {}", snapshot.address);
            return hit;
        }

        let deadline = tokio::time::Instant::now() + self.model_timeout;
        let (source, bytecode, behavior) = tokio::join!(
            run_until(self.source.as_ref(), snapshot, deadline),
            run_until(self.bytecode.as_ref(), snapshot, deadline),
            run_until(self.behavior.as_ref(), snapshot, deadline),
        );

        let mut slots = BTreeMap::new();
        let mut timed_out = Vec::new();
        for (slot, (result, expired)) in [
            (self.source.slot(), source),
            (self.bytecode.slot(), bytecode),
            (self.behavior.slot(), behavior),
        ] {
            if expired {
                timed_out.push(slot.to_string());
            }
            slots.insert(slot.to_string(), result);
        }

        if !timed_out.is_empty() {
            warn!(
                "⏱️ Engine deadline hit for {} ({}), using fallback results",
                snapshot.address,
                timed_out.join(", ")
            );
        }

        let outputs: Vec<ModelOutput> = slots
            .iter()
            .map(|(slot, result)| ModelOutput::from_result(slot.clone(), result))
            .collect();

        let verdict = match self
            .aggregator
            .aggregate(AggregationStrategy::FixedThreeModel, &outputs)
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("⚠️ Engine aggregation failed: {}", e);
                fallback_verdict(&ModelResult::fallback("aggregation_error"))
            }
        };

        let analysis = EngineAnalysis {
            verdict,
            slots,
            processing_time_ms: start.elapsed().as_millis() as u64,
            timed_out,
        };

        if analysis.timed_out.is_empty() {
            self.cache.set(key, analysis.clone());
        }
        debug!(
            "Engine analysis for {} completed in {}ms",
            snapshot.address, analysis.processing_time_ms
        );
        analysis
    }
}

/// Run a model until `deadline`. Returns the result and whether the deadline hit.
async fn run_until(
    model: &dyn ContractModel,
    snapshot: &ContractSnapshot,
    deadline: tokio::time::Instant,
) -> (ModelResult, bool) {
    match tokio::time::timeout_at(deadline, model.analyze(snapshot)).await {
        Ok(Ok(result)) => (result, false),
        Ok(Err(e)) => (ModelResult::fallback(&fallback_reason(model.slot(), &e)), false),
        Err(_) => {
            let err = AppError::analyzer_timeout(format!("{} model exceeded deadline", model.slot()));
            (ModelResult::fallback(&fallback_reason(model.slot(), &err)), true)
        }
    }
}

fn fallback_verdict(result: &ModelResult) -> AggregatedResult {
    AggregatedResult {
        final_risk_level: RiskLevel::classify(result.risk_score, ThresholdRule::Exclusive),
        final_risk_score: result.risk_score,
        confidence: result.confidence,
        explanation: result.explanation.clone(),
        detected_issues: result.detected_issues.clone(),
        recommendations: result.recommendations.clone(),
        model_contributions: BTreeMap::new(),
    }
}

/// Content hash over bounded prefixes of source, bytecode and the address
pub fn cache_key(snapshot: &ContractSnapshot) -> String {
    let source: String = snapshot
        .source_code
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(CACHE_KEY_SOURCE_PREFIX)
        .collect();
    let bytecode: String = snapshot
        .bytecode
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(CACHE_KEY_BYTECODE_PREFIX)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0x1f]);
    hasher.update(bytecode.as_bytes());
    hasher.update([0x1f]);
    hasher.update(snapshot.address.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl AiService for AiEngine {
    fn name(&self) -> &str {
        ENGINE_SERVICE_NAME
    }

    fn supports_bytecode(&self) -> bool {
        true
    }

    async fn analyze(&self, input: &AnalysisInput) -> AppResult<ModelResult> {
        if input.source_code.is_none() && input.bytecode.is_none() {
            return Err(AppError::missing_input("heuristics needs source or bytecode"));
        }
        let analysis = AiEngine::analyze(self, &input.snapshot()).await;
        Ok(analysis.to_model_result())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::{SLOT_BEHAVIOR, SLOT_BYTECODE, SLOT_SOURCE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ADDR: &str = "0x742d35cc6634c0532925a3b844bc454e4438f44e";

    struct SlowModel {
        slot: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl ContractModel for SlowModel {
        fn slot(&self) -> &'static str {
            self.slot
        }

        async fn analyze(&self, _snapshot: &ContractSnapshot) -> AppResult<ModelResult> {
            tokio::time::sleep(self.delay).await;
            Ok(ModelResult {
                risk_score: 0.1,
                confidence: 0.9,
                explanation: "slow model finished".to_string(),
                detected_issues: vec![],
                recommendations: vec![],
                processing_time_ms: self.delay.as_millis() as u64,
            })
        }
    }

    struct CountingModel {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ContractModel for CountingModel {
        fn slot(&self) -> &'static str {
            SLOT_SOURCE
        }

        async fn analyze(&self, snapshot: &ContractSnapshot) -> AppResult<ModelResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            SourceCodeModel.analyze(snapshot).await
        }
    }

    fn config(timeout_ms: u64) -> EngineConfig {
        EngineConfig {
            cache_max_size: 100,
            cache_ttl: Duration::from_secs(600),
            model_timeout: Duration::from_millis(timeout_ms),
            weights: Default::default(),
        }
    }

    fn slow(slot: &'static str, ms: u64) -> Arc<dyn ContractModel> {
        Arc::new(SlowModel {
            slot,
            delay: Duration::from_millis(ms),
        })
    }

    fn snapshot(source: Option<&str>, bytecode: Option<&str>) -> ContractSnapshot {
        ContractSnapshot::new(ADDR, source.map(String::from), bytecode.map(String::from), false)
    }

    #[tokio::test]
    async fn test_all_models_time_out() {
        let engine = AiEngine::new(&config(30), Arc::new(AiAggregator::default())).with_models(
            slow(SLOT_SOURCE, 500),
            slow(SLOT_BYTECODE, 500),
            slow(SLOT_BEHAVIOR, 500),
        );

        let analysis = engine.analyze(&snapshot(Some("contract A {}"), None)).await;
        assert!((analysis.verdict.final_risk_score - 0.5).abs() < 1e-9);
        assert_eq!(analysis.verdict.final_risk_level, RiskLevel::Warning);
        assert_eq!(analysis.timed_out.len(), 3);
        assert_eq!(
            analysis.slots[SLOT_BYTECODE].explanation,
            "Fallback analysis: bytecode_timeout"
        );
        assert_eq!(
            analysis.slots[SLOT_SOURCE].explanation,
            "Fallback analysis: source_code_timeout"
        );
        assert_eq!(
            analysis.slots[SLOT_BEHAVIOR].explanation,
            "Fallback analysis: behavior_timeout"
        );
        // timeouts are not cached
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_only_unfinished_models_fall_back() {
        let engine = AiEngine::new(&config(80), Arc::new(AiAggregator::default())).with_models(
            Arc::new(SourceCodeModel),
            Arc::new(BytecodeModel),
            slow(SLOT_BEHAVIOR, 1000),
        );

        let analysis = engine.analyze(&snapshot(Some("x.delegatecall(y)"), None)).await;
        assert_eq!(analysis.timed_out, vec![SLOT_BEHAVIOR.to_string()]);
        assert_eq!(analysis.slots[SLOT_SOURCE].risk_score, 0.6);
        // bytecode absent -> missing-input fallback, not a timeout
        assert_eq!(
            analysis.slots[SLOT_BYTECODE].explanation,
            "Fallback analysis: no_bytecode"
        );
        // 0.6*0.5 + 0.5*0.3 + 0.5*0.2
        assert!((analysis.verdict.final_risk_score - 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_default_models_source_only() {
        let engine = AiEngine::new(&config(150), Arc::new(AiAggregator::default()));
        let analysis = engine
            .analyze(&snapshot(Some("contract Vault { function f() public {} }"), None))
            .await;
        // 0.2*0.5 + 0.5*0.3 + 0.25*0.2
        assert!((analysis.verdict.final_risk_score - 0.3).abs() < 1e-9);
        assert!(analysis.timed_out.is_empty());
        assert!(analysis.verdict.explanation.starts_with("Aggregated analysis:"));
        assert!(analysis.verdict.explanation.contains("Fallback analysis: no_bytecode"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_models() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = AiEngine::new(&config(150), Arc::new(AiAggregator::default())).with_models(
            Arc::new(CountingModel { calls: calls.clone() }),
            Arc::new(BytecodeModel),
            Arc::new(BehaviorModel),
        );
        let snap = snapshot(Some("contract A {}"), Some("0x6080"));

        let first = engine.analyze(&snap).await;
        let second = engine.analyze(&snap).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(engine.cache_stats().hits, 1);
    }

    #[test]
    fn test_cache_key_uses_bounded_prefixes() {
        let base = "a".repeat(1000);
        let k1 = cache_key(&snapshot(Some(&format!("{}tail-one", base)), None));
        let k2 = cache_key(&snapshot(Some(&format!("{}tail-two", base)), None));
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64);

        let other_addr = ContractSnapshot::new(
            "0x0000000000000000000000000000000000000001",
            Some(base.clone()),
            None,
            false,
        );
        assert_ne!(k1, cache_key(&other_addr));
    }

    #[tokio::test]
    async fn test_engine_as_service() {
        let engine = AiEngine::new(&config(150), Arc::new(AiAggregator::default()));
        let service: &dyn AiService = &engine;
        assert_eq!(service.name(), "heuristics");
        assert!(service.supports_bytecode());

        let result = service
            .analyze(&AnalysisInput::with_bytecode(ADDR, "0x6080604052", false))
            .await
            .unwrap();
        assert!((0.0..=1.0).contains(&result.risk_score));
        assert!(service.analyze(&AnalysisInput::default()).await.is_err());
    }
}
