//! Remote AI analyzers.
//!
//! | service      | name        | input             | endpoint            |
//! |--------------|-------------|-------------------|---------------------|
//! | Venice       | `venice`    | source only       | `POST /inference`   |
//! | Model server | `local_llm` | source only       | `POST /analyze`     |
//! | AgentKit     | `agentkit`  | address (any)     | `POST /analyze`     |
//! | Demo         | configurable| address (any)     | none, hash buckets  |
//!
//! Every response is normalized into a [`ModelResult`]; anything that cannot
//! be normalized is an `AnalyzerInvalidOutput` error so the orchestrator can
//! substitute its failure result.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Instant;
use tracing::{debug, info};

use crate::models::config::{AgentKitConfig, ModelServerConfig, VeniceConfig};
use crate::models::errors::{AppError, AppResult};
use crate::models::types::{AnalysisInput, ModelResult, RiskLevel};
use crate::providers::http::{build_client, status_error, Upstream};
use crate::providers::traits::AiService;
use crate::utils::constants::CHAIN_ID_BASE_SEPOLIA;

pub const VENICE_SERVICE_NAME: &str = "venice";
pub const MODEL_SERVER_SERVICE_NAME: &str = "local_llm";
pub const AGENTKIT_SERVICE_NAME: &str = "agentkit";

fn require_source(input: &AnalysisInput) -> AppResult<&str> {
    input
        .source_code
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::missing_input("source code required"))
}

async fn post_json(service: &str, request: reqwest::RequestBuilder) -> AppResult<Value> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(Upstream::Analyzer, service, status));
    }
    let body: Value = response.json().await?;
    if body.get("status").and_then(Value::as_str) == Some("error") {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(AppError::analyzer_failed(format!("{}: {}", service, message)));
    }
    Ok(body)
}

/// Issues may be plain strings or objects with a description/title
fn issue_strings(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("description")
                .or_else(|| map.get("title"))
                .or_else(|| map.get("type"))
                .and_then(Value::as_str)
                .map(String::from),
            _ => None,
        })
        .filter(|s| !s.trim().is_empty())
        .collect()
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// ============================================
// Venice
// ============================================

/// Map a free-form classification onto a risk level
pub fn classify_label(label: &str) -> Option<RiskLevel> {
    let label = label.to_lowercase();
    if ["dangerous", "high", "red", "critical"].iter().any(|k| label.contains(k)) {
        Some(RiskLevel::Dangerous)
    } else if ["warning", "medium", "yellow", "moderate"].iter().any(|k| label.contains(k)) {
        Some(RiskLevel::Warning)
    } else if ["safe", "low", "green"].iter().any(|k| label.contains(k)) {
        Some(RiskLevel::Safe)
    } else {
        None
    }
}

fn level_score(level: RiskLevel) -> f64 {
    match level {
        RiskLevel::Safe => 0.2,
        RiskLevel::Warning => 0.5,
        RiskLevel::Dangerous => 0.85,
    }
}

/// Normalize a Venice `/inference` response
pub fn parse_venice_response(body: &Value) -> AppResult<ModelResult> {
    let outputs = body.get("outputs").unwrap_or(&Value::Null);
    let raw = outputs
        .get("risk_score")
        .or_else(|| outputs.pointer("/risk_assessment/score"))
        .or_else(|| outputs.pointer("/security_assessment/overall_risk"))
        .ok_or_else(|| AppError::invalid_output("venice response has no risk classification"))?;

    let (risk_score, level) = match raw {
        Value::Number(n) => {
            let score = n.as_f64().unwrap_or(0.5);
            let score = if score > 1.0 { score / 100.0 } else { score };
            (score, None)
        }
        Value::String(label) => {
            let level = classify_label(label).ok_or_else(|| {
                AppError::invalid_output(format!("venice classification '{}' is unknown", label))
            })?;
            (level_score(level), Some(level))
        }
        other => {
            return Err(AppError::invalid_output(format!(
                "venice risk classification has unexpected type: {}",
                other
            )))
        }
    };

    let mut detected_issues = issue_strings(outputs.get("vulnerabilities"));
    detected_issues.extend(issue_strings(outputs.get("security_issues")));
    let recommendations = issue_strings(outputs.get("recommendations"));

    let explanation = outputs
        .get("summary")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| match level {
            Some(level) => format!("Venice classification: {}", level),
            None => format!("Venice risk score: {:.2}", risk_score),
        });

    Ok(ModelResult {
        risk_score,
        confidence: number(outputs.get("confidence")).unwrap_or(0.7),
        explanation,
        detected_issues,
        recommendations,
        processing_time_ms: 0,
    })
}

pub struct VeniceService {
    client: reqwest::Client,
    config: VeniceConfig,
}

impl VeniceService {
    pub fn new(config: VeniceConfig) -> AppResult<Self> {
        let client = build_client(config.timeout)?;
        info!("🤖 Venice service registered (model: {})", config.model);
        Ok(Self { client, config })
    }
}

#[async_trait]
impl AiService for VeniceService {
    fn name(&self) -> &str {
        VENICE_SERVICE_NAME
    }

    async fn analyze(&self, input: &AnalysisInput) -> AppResult<ModelResult> {
        let source = require_source(input)?;
        let start = Instant::now();
        let payload = json!({
            "model_id": self.config.model,
            "inputs": {
                "source_code": source,
                "language": "solidity",
                "analysis_type": "security_scan",
                "risk_assessment": true
            },
            "parameters": {
                "max_tokens": 4000,
                "temperature": 0.1,
                "response_format": "detailed"
            }
        });

        let url = format!("{}/inference", self.config.base_url.trim_end_matches('/'));
        let request = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&payload);
        let body = post_json(VENICE_SERVICE_NAME, request).await?;

        let mut result = parse_venice_response(&body)?;
        result.processing_time_ms = elapsed_ms(start);
        debug!("Venice scored {} at {:.2}", input.address, result.risk_score);
        Ok(result)
    }
}

// ============================================
// Local model server
// ============================================

#[derive(Debug, Deserialize)]
struct ModelServerResponse {
    risk_score: f64,
    #[serde(default = "default_model_confidence")]
    confidence: f64,
    #[serde(default)]
    vulnerabilities: Vec<Value>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    processing_time_ms: u64,
}

fn default_model_confidence() -> f64 {
    0.5
}

/// Normalize a model server `/analyze` response
pub fn parse_model_server_response(body: Value) -> AppResult<ModelResult> {
    let response: ModelServerResponse = serde_json::from_value(body)
        .map_err(|e| AppError::invalid_output(format!("model server response: {}", e)))?;
    let detected_issues = issue_strings(Some(&Value::Array(response.vulnerabilities)));
    Ok(ModelResult {
        risk_score: response.risk_score,
        confidence: response.confidence,
        explanation: format!(
            "Fine-tuned code model: {} vulnerabilities detected",
            detected_issues.len()
        ),
        detected_issues,
        recommendations: response.recommendations,
        processing_time_ms: response.processing_time_ms,
    })
}

pub struct ModelServerService {
    client: reqwest::Client,
    config: ModelServerConfig,
}

impl ModelServerService {
    pub fn new(config: ModelServerConfig) -> AppResult<Self> {
        let client = build_client(config.timeout)?;
        info!("🤖 Model server registered ({})", config.base_url);
        Ok(Self { client, config })
    }
}

#[async_trait]
impl AiService for ModelServerService {
    fn name(&self) -> &str {
        MODEL_SERVER_SERVICE_NAME
    }

    async fn analyze(&self, input: &AnalysisInput) -> AppResult<ModelResult> {
        let source = require_source(input)?;
        let start = Instant::now();
        let url = format!("{}/analyze", self.config.base_url.trim_end_matches('/'));
        let request = self.client.post(url).json(&json!({
            "source_code": source,
            "metadata": { "address": input.address, "is_proxy": input.is_proxy }
        }));
        let body = post_json(MODEL_SERVER_SERVICE_NAME, request).await?;

        let mut result = parse_model_server_response(body)?;
        if result.processing_time_ms == 0 {
            result.processing_time_ms = elapsed_ms(start);
        }
        Ok(result)
    }
}

// ============================================
// AgentKit
// ============================================

/// Normalize an AgentKit `/analyze` response
pub fn parse_agentkit_response(body: &Value) -> AppResult<ModelResult> {
    let risk_score = number(body.get("risk_score"))
        .ok_or_else(|| AppError::invalid_output("agentkit response has no risk_score"))?;
    let explanation = body
        .get("analysis_summary")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("AgentKit risk score: {:.2}", risk_score));

    Ok(ModelResult {
        risk_score,
        confidence: number(body.get("confidence")).unwrap_or(0.5),
        explanation,
        detected_issues: issue_strings(body.get("vulnerabilities")),
        recommendations: issue_strings(body.get("recommendations")),
        processing_time_ms: 0,
    })
}

pub struct AgentKitService {
    client: reqwest::Client,
    config: AgentKitConfig,
    chain_id: u64,
}

impl AgentKitService {
    pub fn new(config: AgentKitConfig) -> AppResult<Self> {
        let client = build_client(config.timeout)?;
        info!("🤖 AgentKit service registered ({})", config.base_url);
        Ok(Self {
            client,
            config,
            chain_id: CHAIN_ID_BASE_SEPOLIA,
        })
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }
}

#[async_trait]
impl AiService for AgentKitService {
    fn name(&self) -> &str {
        AGENTKIT_SERVICE_NAME
    }

    fn supports_bytecode(&self) -> bool {
        true
    }

    async fn analyze(&self, input: &AnalysisInput) -> AppResult<ModelResult> {
        let start = Instant::now();
        let url = format!("{}/analyze", self.config.base_url.trim_end_matches('/'));
        let mut request = self.client.post(url).json(&json!({
            "contract_address": input.address,
            "chain_id": self.chain_id,
        }));
        if let Some(key) = self.config.api_key.as_deref() {
            request = request.bearer_auth(key);
        }
        let body = post_json(AGENTKIT_SERVICE_NAME, request).await?;

        let mut result = parse_agentkit_response(&body)?;
        result.processing_time_ms = elapsed_ms(start);
        Ok(result)
    }
}

// ============================================
// Demo analyzer
// ============================================

/// Deterministic stand-in for a real model: buckets the address hash.
/// Holds no business meaning; swap it for a real service when one exists.
pub struct DemoAnalyzer {
    name: String,
}

impl DemoAnalyzer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl AiService for DemoAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_bytecode(&self) -> bool {
        true
    }

    async fn analyze(&self, input: &AnalysisInput) -> AppResult<ModelResult> {
        let digest = Sha256::digest(input.address.to_lowercase().as_bytes());
        let (risk_score, level) = match digest[0] {
            0..=85 => (0.15, RiskLevel::Safe),
            86..=170 => (0.5, RiskLevel::Warning),
            _ => (0.82, RiskLevel::Dangerous),
        };
        Ok(ModelResult {
            risk_score,
            confidence: 0.6,
            explanation: format!("Demo analysis bucket: {}", level),
            detected_issues: Vec::new(),
            recommendations: vec!["Replace demo analyzer with a real model".to_string()],
            processing_time_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::errors::ErrorCode;

    #[test]
    fn test_classify_label() {
        assert_eq!(classify_label("SAFE"), Some(RiskLevel::Safe));
        assert_eq!(classify_label("low risk"), Some(RiskLevel::Safe));
        assert_eq!(classify_label("Moderate"), Some(RiskLevel::Warning));
        assert_eq!(classify_label("critical"), Some(RiskLevel::Dangerous));
        assert_eq!(classify_label("banana"), None);
    }

    #[test]
    fn test_parse_venice_label() {
        let body = json!({
            "outputs": {
                "risk_assessment": { "score": "Dangerous" },
                "vulnerabilities": [
                    { "title": "Reentrancy", "description": "External call before state update" },
                    "Unchecked return value"
                ],
                "recommendations": ["Use checks-effects-interactions"],
                "confidence": 0.9
            }
        });
        let result = parse_venice_response(&body).unwrap();
        assert_eq!(result.risk_score, 0.85);
        assert_eq!(result.confidence, 0.9);
        assert_eq!(
            result.detected_issues,
            vec![
                "External call before state update".to_string(),
                "Unchecked return value".to_string()
            ]
        );
        assert_eq!(result.explanation, "Venice classification: Dangerous");
    }

    #[test]
    fn test_parse_venice_rejects_unknown() {
        let unknown = json!({ "outputs": { "risk_score": "purple" } });
        assert_eq!(
            parse_venice_response(&unknown).unwrap_err().code,
            ErrorCode::AnalyzerInvalidOutput
        );
        let missing = json!({ "outputs": {} });
        assert!(parse_venice_response(&missing).is_err());
    }

    #[test]
    fn test_parse_model_server() {
        let body = json!({
            "risk_score": 0.73,
            "confidence": 0.9,
            "vulnerabilities": [
                { "type": "unknown", "severity": "high", "location": "", "description": "tx.origin auth" }
            ],
            "recommendations": ["Use msg.sender"],
            "processing_time_ms": 50
        });
        let result = parse_model_server_response(body).unwrap();
        assert_eq!(result.risk_score, 0.73);
        assert_eq!(result.detected_issues, vec!["tx.origin auth".to_string()]);
        assert_eq!(result.processing_time_ms, 50);

        assert!(parse_model_server_response(json!({ "confidence": 0.9 })).is_err());
    }

    #[test]
    fn test_parse_agentkit_string_score() {
        let body = json!({
            "risk_score": "0.24",
            "risk_level": 0,
            "confidence": 0.85,
            "vulnerabilities": [],
            "analysis_summary": "Contract appears safe based on AI analysis"
        });
        let result = parse_agentkit_response(&body).unwrap();
        assert_eq!(result.risk_score, 0.24);
        assert_eq!(result.confidence, 0.85);
        assert_eq!(result.explanation, "Contract appears safe based on AI analysis");
    }

    #[tokio::test]
    async fn test_demo_analyzer_is_deterministic() {
        let demo = DemoAnalyzer::new("agentkit");
        let input = AnalysisInput::with_bytecode(
            "0x742d35Cc6634C0532925a3b844Bc454e4438f44e",
            "0x6080",
            false,
        );
        let first = demo.analyze(&input).await.unwrap();
        let lower = AnalysisInput::with_bytecode(&input.address.to_lowercase(), "0x6080", false);
        let second = demo.analyze(&lower).await.unwrap();
        assert_eq!(first, second);
        assert!([0.15, 0.5, 0.82].contains(&first.risk_score));
        assert_eq!(demo.name(), "agentkit");
        assert!(demo.supports_bytecode());
    }

    #[tokio::test]
    async fn test_source_only_services_need_source() {
        let config = VeniceConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "test".to_string(),
            model: "m".to_string(),
            timeout: std::time::Duration::from_secs(1),
        };
        let venice = VeniceService::new(config).unwrap();
        assert!(!venice.supports_bytecode());
        let err = venice
            .analyze(&AnalysisInput::with_bytecode("0xabc", "0x6080", false))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AnalyzerMissingInput);
    }
}
