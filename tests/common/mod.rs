//! In-process fakes for the scan pipeline collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use scathat_scanner::models::types::{AnalysisInput, ModelResult, SimilarContract, SourceInfo};
use scathat_scanner::providers::traits::{AiService, ContractExplorer, RegistryClient, VectorStore};
use scathat_scanner::{AppError, AppResult};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const ADDR: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";
pub const OTHER_ADDR: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

// ============================================
// Explorer
// ============================================

pub enum Lookup {
    Found(String),
    Missing,
    Fails,
}

pub struct FakeExplorer {
    pub source: Lookup,
    pub bytecode: Lookup,
    pub bytecode_calls: AtomicUsize,
}

impl FakeExplorer {
    pub fn verified(source: &str) -> Self {
        Self {
            source: Lookup::Found(source.to_string()),
            bytecode: Lookup::Missing,
            bytecode_calls: AtomicUsize::new(0),
        }
    }

    pub fn unverified(bytecode: &str) -> Self {
        Self {
            source: Lookup::Missing,
            bytecode: Lookup::Found(bytecode.to_string()),
            bytecode_calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            source: Lookup::Missing,
            bytecode: Lookup::Missing,
            bytecode_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContractExplorer for FakeExplorer {
    async fn get_source(&self, _address: &str) -> AppResult<Option<SourceInfo>> {
        match &self.source {
            Lookup::Found(code) => Ok(Some(SourceInfo {
                source_code: code.clone(),
                contract_name: "Proxy".to_string(),
                compiler_version: "v0.8.19+commit.7dd6d404".to_string(),
                verified: true,
                ..Default::default()
            })),
            Lookup::Missing => Ok(None),
            Lookup::Fails => Err(AppError::explorer_unavailable("explorer returned 503")),
        }
    }

    async fn get_bytecode(&self, _address: &str) -> AppResult<Option<String>> {
        self.bytecode_calls.fetch_add(1, Ordering::SeqCst);
        match &self.bytecode {
            Lookup::Found(code) => Ok(Some(code.clone())),
            Lookup::Missing => Ok(None),
            Lookup::Fails => Err(AppError::explorer_unavailable("explorer returned 503")),
        }
    }
}

// ============================================
// AI services
// ============================================

pub enum Behavior {
    Returns(ModelResult),
    Fails,
    Hangs,
    Panics,
}

pub struct ScriptedService {
    pub name: &'static str,
    pub bytecode: bool,
    pub behavior: Behavior,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<AnalysisInput>>,
}

impl ScriptedService {
    pub fn new(name: &'static str, behavior: Behavior) -> Self {
        Self {
            name,
            bytecode: false,
            behavior,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn returning(name: &'static str, risk_score: f64, confidence: f64) -> Self {
        Self::new(name, Behavior::Returns(result(risk_score, confidence, "Reentrancy guard missing")))
    }

    pub fn with_bytecode(mut self) -> Self {
        self.bytecode = true;
        self
    }
}

pub fn result(risk_score: f64, confidence: f64, issue: &str) -> ModelResult {
    ModelResult {
        risk_score,
        confidence,
        explanation: "Scripted analysis finished".to_string(),
        detected_issues: vec![issue.to_string()],
        recommendations: vec!["Review access control".to_string()],
        processing_time_ms: 3,
    }
}

#[async_trait]
impl AiService for ScriptedService {
    fn name(&self) -> &str {
        self.name
    }

    fn supports_bytecode(&self) -> bool {
        self.bytecode
    }

    async fn analyze(&self, input: &AnalysisInput) -> AppResult<ModelResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(input.clone());
        }
        match &self.behavior {
            Behavior::Returns(result) => Ok(result.clone()),
            Behavior::Fails => Err(AppError::analyzer_failed("upstream returned 500")),
            Behavior::Hangs => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(AppError::analyzer_timeout("unreachable"))
            }
            Behavior::Panics => panic!("analyzer crashed"),
        }
    }
}

// ============================================
// Vector store
// ============================================

/// Vector store whose writes always fail
pub struct BrokenVectorStore;

#[async_trait]
impl VectorStore for BrokenVectorStore {
    async fn store(
        &self,
        _key: &str,
        _vector: &[f32],
        _metadata: BTreeMap<String, serde_json::Value>,
    ) -> AppResult<bool> {
        Err(AppError::vector_store("index unavailable"))
    }

    async fn fetch(&self, _key: &str) -> AppResult<Option<Vec<f32>>> {
        Err(AppError::vector_store("index unavailable"))
    }

    async fn query_similar(&self, _vector: &[f32], _top_k: usize) -> AppResult<Vec<SimilarContract>> {
        Err(AppError::vector_store("index unavailable"))
    }
}

// ============================================
// Registry
// ============================================

#[derive(Default)]
pub struct FakeRegistry {
    pub writable: bool,
    pub scores: Mutex<BTreeMap<String, String>>,
    pub writes: AtomicUsize,
}

impl FakeRegistry {
    pub fn writable() -> Self {
        Self {
            writable: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    fn can_write(&self) -> bool {
        self.writable
    }

    async fn write_score(&self, address: &str, score: &str) -> AppResult<Option<String>> {
        if !self.writable {
            return Ok(None);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut scores) = self.scores.lock() {
            scores.insert(address.to_lowercase(), score.to_string());
        }
        Ok(Some(format!("0x{}", "ab".repeat(32))))
    }

    async fn read_score(&self, address: &str) -> AppResult<Option<String>> {
        Ok(self
            .scores
            .lock()
            .ok()
            .and_then(|s| s.get(&address.to_lowercase()).cloned()))
    }
}
