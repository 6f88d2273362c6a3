//! Integration tests for the scan pipeline

mod common;

use common::*;
use scathat_scanner::core::adapters::{BehaviorModel, ContractModel, SourceCodeModel};
use scathat_scanner::models::config::EngineConfig;
use scathat_scanner::models::types::ContractSnapshot;
use scathat_scanner::providers::{InMemoryVectorStore, SqliteRepository};
use scathat_scanner::{
    AggregationStrategy, AiAggregator, AiEngine, ModelOutput, RiskLevel, ScanOrchestrator,
    ScanTelemetry,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const DELEGATING_PROXY: &str = r#"
// SPDX-License-Identifier: MIT
contract Proxy {
    address impl;
    fallback() external payable {
        (bool ok, ) = impl.delegatecall(msg.data);
        require(ok);
    }
}
"#;

fn telemetry() -> Arc<ScanTelemetry> {
    Arc::new(ScanTelemetry::new(std::env::temp_dir().join("scathat-it-telemetry")))
}

fn pipeline(explorer: FakeExplorer) -> ScanOrchestrator {
    ScanOrchestrator::new(Arc::new(explorer), Arc::new(AiAggregator::default()))
        .with_vector_store(Arc::new(InMemoryVectorStore::new()))
        .with_repository(Arc::new(SqliteRepository::open_in_memory().unwrap()))
}

#[tokio::test]
async fn test_verified_contract_full_pipeline() {
    let orch = pipeline(FakeExplorer::verified(DELEGATING_PROXY))
        .with_service(Arc::new(ScriptedService::returning("agentkit", 0.8, 0.9)))
        .with_service(Arc::new(ScriptedService::returning("venice", 0.6, 0.7)));

    let result = orch.scan(ADDR).await;

    assert!(result.success, "scan should succeed: {:?}", result.error);
    assert!(result.embedding_stored);
    assert!(result.log_saved);
    assert!(result.warnings.is_empty(), "unexpected warnings: {:?}", result.warnings);
    assert_eq!(result.ai_outputs.len(), 2);

    // (0.8*0.4*0.9 + 0.6*0.3*0.7) / (0.4 + 0.3)
    let expected = (0.288 + 0.126) / 0.7;
    let score = result.final_risk_score.unwrap();
    assert!((score - expected).abs() < 1e-9, "score {}", score);
    assert_eq!(result.risk_level, Some(RiskLevel::Warning));

    // Shared issue text is reported once
    let aggregated = result.aggregated.as_ref().unwrap();
    assert_eq!(
        aggregated
            .detected_issues
            .iter()
            .filter(|i| i.as_str() == "Reentrancy guard missing")
            .count(),
        1
    );
    let total: f64 = aggregated.model_contributions.values().sum();
    assert!((total - 1.0).abs() < 1e-9);

    let stored = orch.get_scan(&result.scan_id).await.unwrap().unwrap();
    assert_eq!(stored.contract_address, ADDR.to_lowercase());
    assert_eq!(stored.risk_level, RiskLevel::Warning);

    let history = orch.history(ADDR, 30).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].scan_id, result.scan_id);
}

#[tokio::test]
async fn test_source_present_skips_bytecode_fetch() {
    let explorer = Arc::new(FakeExplorer::verified("contract A {}"));
    let service = Arc::new(ScriptedService::returning("venice", 0.2, 0.9));
    let orch = ScanOrchestrator::new(explorer.clone(), Arc::new(AiAggregator::default()))
        .with_service(service.clone());

    let result = orch.scan(ADDR).await;
    assert!(result.success);
    assert_eq!(explorer.bytecode_calls.load(Ordering::SeqCst), 0);

    let seen = service.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].source_code.as_deref(), Some("contract A {}"));
    assert!(seen[0].bytecode.is_none());
}

#[tokio::test]
async fn test_explorer_source_failure_falls_through_to_bytecode() {
    let explorer = FakeExplorer {
        source: Lookup::Fails,
        ..FakeExplorer::unverified("0x608060405234801561001057600080fd5b50")
    };
    let orch = pipeline(explorer)
        .with_service(Arc::new(ScriptedService::returning("agentkit", 0.9, 1.0).with_bytecode()))
        .with_service(Arc::new(ScriptedService::returning("venice", 0.1, 1.0)));

    let result = orch.scan(ADDR).await;

    assert!(result.success);
    assert!(result.source_code.is_none());
    assert!(result.bytecode.is_some());
    assert!(!result.normalized_metadata.as_ref().unwrap().verified);
    assert!(result.warnings.iter().any(|w| w.contains("explorer source")));

    // venice cannot read bytecode and gets the limited-analysis placeholder
    let venice = &result.ai_outputs["venice"];
    assert_eq!(venice.risk_score, 0.5);
    assert_eq!(venice.confidence, 0.3);
    assert_eq!(venice.explanation, "Analysis based on bytecode only");
    assert_eq!(result.ai_outputs["agentkit"].risk_score, 0.9);
}

#[tokio::test]
async fn test_no_contract_data_is_the_only_terminal_failure() {
    let tele = telemetry();
    let service = Arc::new(ScriptedService::returning("venice", 0.1, 1.0));
    let orch = pipeline(FakeExplorer::empty())
        .with_service(service.clone())
        .with_telemetry(tele.clone());

    let result = orch.scan(ADDR).await;

    assert!(!result.success);
    assert!(result.error.is_some());
    assert!(result.final_risk_score.is_none());
    assert!(!result.log_saved);
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    assert_eq!(tele.get_stats().failed_scans, 1);
}

#[tokio::test]
async fn test_fault_injection_never_escapes_scan() {
    let tele = telemetry();
    let orch = ScanOrchestrator::new(
        Arc::new(FakeExplorer::verified(DELEGATING_PROXY)),
        Arc::new(AiAggregator::default()),
    )
    .with_service(Arc::new(ScriptedService::new("agentkit", Behavior::Fails)))
    .with_service(Arc::new(ScriptedService::new("venice", Behavior::Panics)))
    .with_service(Arc::new(ScriptedService::new("local_llm", Behavior::Hangs)))
    .with_service(Arc::new(ScriptedService::returning("heuristics", 0.9, 0.9)))
    .with_vector_store(Arc::new(BrokenVectorStore))
    .with_repository(Arc::new(SqliteRepository::open_in_memory().unwrap()))
    .with_telemetry(tele.clone())
    .with_service_timeout(Duration::from_millis(100));

    let result = orch.scan(ADDR).await;

    assert!(result.success);
    assert_eq!(result.ai_outputs.len(), 4);
    for name in ["agentkit", "venice", "local_llm"] {
        let failed = &result.ai_outputs[name];
        assert_eq!(failed.risk_score, 0.5, "{}", name);
        assert_eq!(failed.confidence, 0.1, "{}", name);
        assert!(failed.explanation.starts_with("Analysis failed"), "{}", name);
    }
    assert!(result.ai_outputs["local_llm"].explanation.contains("timed out"));

    assert!(!result.embedding_stored);
    assert!(result.log_saved);
    assert!(result.warnings.iter().any(|w| w.starts_with("vector store")));
    assert!(result.final_risk_score.is_some());

    let stats = tele.get_stats();
    assert_eq!(stats.analyzer_fallbacks, 3);
    assert_eq!(stats.successful_scans, 1);
}

#[tokio::test]
async fn test_similar_contracts_exclude_the_query_address() {
    let orch = pipeline(FakeExplorer::verified("contract Token { function transfer() {} }"))
        .with_service(Arc::new(ScriptedService::returning("venice", 0.2, 0.9)));

    assert!(orch.scan(ADDR).await.embedding_stored);
    assert!(orch.scan(OTHER_ADDR).await.embedding_stored);

    let similar = orch.find_similar(ADDR, 5).await.unwrap();
    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0].key, OTHER_ADDR);
    // Same analyzer output and metadata, identical embedding
    assert!((similar[0].score - 1.0).abs() < 1e-6);

    let unknown = orch
        .find_similar("0x0000000000000000000000000000000000000001", 5)
        .await;
    assert!(unknown.is_err());
}

#[tokio::test]
async fn test_delegatecall_scenario() {
    let snapshot = ContractSnapshot::new(ADDR, Some(DELEGATING_PROXY.to_string()), None, false);

    let source = SourceCodeModel.analyze(&snapshot).await.unwrap();
    assert!(source.risk_score >= 0.6);
    assert!(source.detected_issues.iter().any(|i| i == "Uses delegatecall"));

    let behavior = BehaviorModel.analyze(&snapshot).await.unwrap();
    assert_eq!(behavior.risk_score, 0.25);

    // Single "source" model at full confidence carries its score through
    let aggregator = AiAggregator::default();
    let mut output = ModelOutput::from_result("source", &source);
    output.confidence = 1.0;
    let verdict = aggregator
        .aggregate(AggregationStrategy::WeightedByConfidence, &[output])
        .unwrap();
    assert!((verdict.final_risk_score - 0.6).abs() < 1e-9);
    assert_eq!(verdict.final_risk_level, RiskLevel::Warning);

    // At the model's own confidence the score is discounted but stays Warning
    let verdict = aggregator
        .aggregate(
            AggregationStrategy::WeightedByConfidence,
            &[ModelOutput::from_result("source", &source)],
        )
        .unwrap();
    assert!((verdict.final_risk_score - 0.48).abs() < 1e-9);
    assert_eq!(verdict.final_risk_level, RiskLevel::Warning);
}

#[tokio::test]
async fn test_engine_inside_orchestrator() {
    let aggregator = Arc::new(AiAggregator::default());
    let engine = Arc::new(AiEngine::new(&EngineConfig::default(), aggregator.clone()));
    let orch = ScanOrchestrator::new(Arc::new(FakeExplorer::verified(DELEGATING_PROXY)), aggregator)
        .with_service(engine.clone());

    let first = orch.scan(ADDR).await;
    let second = orch.scan(ADDR).await;

    assert!(first.success && second.success);
    let heuristics = &first.ai_outputs["heuristics"];
    // 0.6*0.5 (source) + 0.5*0.3 (bytecode fallback) + 0.25*0.2 (behavior)
    assert!((heuristics.risk_score - 0.5).abs() < 1e-9);
    assert_eq!(first.ai_outputs["heuristics"], second.ai_outputs["heuristics"]);
    assert_eq!(engine.cache_stats().hits, 1);
}
