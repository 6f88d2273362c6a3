//! Contract embedding storage.
//!
//! - `PineconeStore`: Pinecone data-plane REST (`/vectors/upsert`, `/query`,
//!   `/vectors/fetch`)
//! - `InMemoryVectorStore`: DashMap + brute-force cosine similarity, used when
//!   Pinecone is not configured
//!
//! Both enforce the fixed embedding dimension and stamp `stored_at`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::models::config::PineconeConfig;
use crate::models::errors::{AppError, AppResult};
use crate::models::types::SimilarContract;
use crate::providers::http::{build_client, status_error, Upstream};
use crate::providers::traits::VectorStore;
use crate::utils::constants::EMBEDDING_DIM;

fn check_dimension(vector: &[f32]) -> AppResult<()> {
    if vector.len() != EMBEDDING_DIM {
        return Err(AppError::vector_store(format!(
            "Embedding has {} dimensions, expected {}",
            vector.len(),
            EMBEDDING_DIM
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(AppError::vector_store("Embedding contains non-finite values"));
    }
    Ok(())
}

fn stamp(mut metadata: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    metadata.insert(
        "stored_at".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    metadata
}

// ============================================
// Pinecone
// ============================================

#[derive(Serialize)]
struct PineconeVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a BTreeMap<String, Value>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<PineconeVector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, FetchedVector>,
}

#[derive(Deserialize)]
struct FetchedVector {
    values: Vec<f32>,
}

pub struct PineconeStore {
    client: reqwest::Client,
    config: PineconeConfig,
}

impl PineconeStore {
    pub fn new(config: PineconeConfig) -> AppResult<Self> {
        let client = build_client(config.timeout)?;
        info!("📦 Pinecone vector store ready ({})", config.index_host);
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.index_host.trim_end_matches('/'), path)
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: reqwest::RequestBuilder) -> AppResult<T> {
        let response = request
            .header("Api-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| AppError::vector_store(format!("Pinecone request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(Upstream::VectorStore, "pinecone", status));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::vector_store(format!("Pinecone response parse failed: {}", e)))
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn store(
        &self,
        key: &str,
        vector: &[f32],
        metadata: BTreeMap<String, Value>,
    ) -> AppResult<bool> {
        check_dimension(vector)?;
        let metadata = stamp(metadata);
        let body = UpsertRequest {
            vectors: vec![PineconeVector {
                id: key,
                values: vector,
                metadata: &metadata,
            }],
            namespace: self.config.namespace.as_deref(),
        };

        let response: UpsertResponse = self
            .send(self.client.post(self.url("/vectors/upsert")).json(&body))
            .await?;
        debug!("📦 Upserted {} vector(s) for {}", response.upserted_count, key);
        Ok(response.upserted_count > 0)
    }

    async fn fetch(&self, key: &str) -> AppResult<Option<Vec<f32>>> {
        let mut query = vec![("ids", key)];
        if let Some(ns) = self.config.namespace.as_deref() {
            query.push(("namespace", ns));
        }
        let mut response: FetchResponse = self
            .send(self.client.get(self.url("/vectors/fetch")).query(&query))
            .await?;
        Ok(response.vectors.remove(key).map(|v| v.values))
    }

    async fn query_similar(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<SimilarContract>> {
        check_dimension(vector)?;
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            namespace: self.config.namespace.as_deref(),
        };
        let response: QueryResponse = self
            .send(self.client.post(self.url("/query")).json(&body))
            .await?;

        Ok(response
            .matches
            .into_iter()
            .map(|m| SimilarContract {
                key: m.id,
                score: m.score,
                metadata: m.metadata,
            })
            .collect())
    }
}

// ============================================
// In-memory
// ============================================

#[derive(Debug, Clone)]
struct StoredVector {
    values: Vec<f32>,
    metadata: BTreeMap<String, Value>,
}

/// Process-local store; contents are lost on restart
#[derive(Default)]
pub struct InMemoryVectorStore {
    vectors: DashMap<String, StoredVector>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn store(
        &self,
        key: &str,
        vector: &[f32],
        metadata: BTreeMap<String, Value>,
    ) -> AppResult<bool> {
        check_dimension(vector)?;
        self.vectors.insert(
            key.to_string(),
            StoredVector {
                values: vector.to_vec(),
                metadata: stamp(metadata),
            },
        );
        Ok(true)
    }

    async fn fetch(&self, key: &str) -> AppResult<Option<Vec<f32>>> {
        Ok(self.vectors.get(key).map(|v| v.values.clone()))
    }

    async fn query_similar(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<SimilarContract>> {
        check_dimension(vector)?;
        let mut hits: Vec<SimilarContract> = self
            .vectors
            .iter()
            .map(|entry| SimilarContract {
                key: entry.key().clone(),
                score: cosine_similarity(vector, &entry.value().values),
                metadata: entry.value().metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(head: &[f32]) -> Vec<f32> {
        let mut v = head.to_vec();
        v.resize(EMBEDDING_DIM, 0.0);
        v
    }

    #[tokio::test]
    async fn test_store_and_fetch() {
        let store = InMemoryVectorStore::new();
        let v = embedding(&[0.8, 0.6]);
        assert!(store.store("0xabc", &v, BTreeMap::new()).await.unwrap());
        assert_eq!(store.fetch("0xabc").await.unwrap(), Some(v));
        assert_eq!(store.fetch("0xdef").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dimension_checked() {
        let store = InMemoryVectorStore::new();
        let err = store
            .store("0xabc", &[0.1, 0.2], BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.message.contains("expected 128"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let store = InMemoryVectorStore::new();
        let mut meta = BTreeMap::new();
        meta.insert("risk_level".to_string(), Value::String("Dangerous".into()));
        store.store("0xnear", &embedding(&[0.9, 0.1]), meta).await.unwrap();
        store
            .store("0xfar", &embedding(&[0.0, 1.0]), BTreeMap::new())
            .await
            .unwrap();
        store
            .store("0xsame", &embedding(&[1.0, 0.0]), BTreeMap::new())
            .await
            .unwrap();

        let hits = store.query_similar(&embedding(&[1.0, 0.0]), 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "0xsame");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert_eq!(hits[1].key, "0xnear");
        assert!(hits[1].metadata.contains_key("stored_at"));
        assert_eq!(hits[1].metadata["risk_level"], Value::String("Dangerous".into()));
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
