//! SQLite analysis log.
//!
//! Two tables:
//! - `analysis_logs`: one row per scan, list/map columns stored as JSON text
//! - `risk_history`: append-only (address, score, level, time) timeline
//!
//! `rusqlite` is blocking, so every trait call hops onto
//! `tokio::task::spawn_blocking` and takes the connection mutex there.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::models::errors::{AppError, AppResult};
use crate::models::types::{AnalysisRecord, RiskHistoryEntry, RiskLevel};
use crate::providers::traits::AnalysisRepository;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS analysis_logs (
    scan_id             TEXT PRIMARY KEY,
    contract_address    TEXT NOT NULL,
    risk_score          REAL NOT NULL,
    risk_level          TEXT NOT NULL,
    explanation         TEXT NOT NULL,
    detected_issues     TEXT NOT NULL,
    recommendations     TEXT NOT NULL,
    model_contributions TEXT NOT NULL,
    metadata_json       TEXT,
    embedding_json      TEXT NOT NULL,
    created_at          INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_logs_address ON analysis_logs(contract_address);
CREATE INDEX IF NOT EXISTS idx_logs_created ON analysis_logs(created_at);

CREATE TABLE IF NOT EXISTS risk_history (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id          TEXT NOT NULL,
    contract_address TEXT NOT NULL,
    risk_score       REAL NOT NULL,
    risk_level       TEXT NOT NULL,
    recorded_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_address ON risk_history(contract_address, recorded_at);
"#;

const SELECT_RECORD: &str = "SELECT scan_id, contract_address, risk_score, risk_level, explanation, \
     detected_issues, recommendations, model_contributions, metadata_json, embedding_json, created_at \
     FROM analysis_logs";

/// Row as stored; JSON columns still encoded
struct RawRecord {
    scan_id: String,
    contract_address: String,
    risk_score: f64,
    risk_level: String,
    explanation: String,
    detected_issues: String,
    recommendations: String,
    model_contributions: String,
    metadata_json: Option<String>,
    embedding_json: String,
    created_at: i64,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            scan_id: row.get(0)?,
            contract_address: row.get(1)?,
            risk_score: row.get(2)?,
            risk_level: row.get(3)?,
            explanation: row.get(4)?,
            detected_issues: row.get(5)?,
            recommendations: row.get(6)?,
            model_contributions: row.get(7)?,
            metadata_json: row.get(8)?,
            embedding_json: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn decode(self) -> AppResult<AnalysisRecord> {
        let metadata = match self.metadata_json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        Ok(AnalysisRecord {
            scan_id: self.scan_id,
            contract_address: self.contract_address,
            risk_score: self.risk_score,
            risk_level: self.risk_level.parse()?,
            explanation: self.explanation,
            detected_issues: serde_json::from_str(&self.detected_issues)?,
            recommendations: serde_json::from_str(&self.recommendations)?,
            model_contributions: serde_json::from_str(&self.model_contributions)?,
            metadata,
            embedding: serde_json::from_str(&self.embedding_json)?,
            created_at: self.created_at,
        })
    }
}

#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::database(format!(
                    "failed to create db directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        info!("🗄️ Analysis database opened at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> AppResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| AppError::database("database mutex poisoned"))?;
            f(&*guard)
        })
        .await
        .map_err(|e| AppError::database(format!("database task failed: {}", e)))?
    }
}

fn insert_record(conn: &Connection, record: &AnalysisRecord) -> AppResult<()> {
    let metadata_json = match &record.metadata {
        Some(m) => Some(serde_json::to_string(m)?),
        None => None,
    };
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR REPLACE INTO analysis_logs (scan_id, contract_address, risk_score, risk_level, \
         explanation, detected_issues, recommendations, model_contributions, metadata_json, \
         embedding_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.scan_id,
            record.contract_address,
            record.risk_score,
            record.risk_level.as_str(),
            record.explanation,
            serde_json::to_string(&record.detected_issues)?,
            serde_json::to_string(&record.recommendations)?,
            serde_json::to_string(&record.model_contributions)?,
            metadata_json,
            serde_json::to_string(&record.embedding)?,
            record.created_at,
        ],
    )?;
    tx.execute(
        "INSERT INTO risk_history (scan_id, contract_address, risk_score, risk_level, recorded_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.scan_id,
            record.contract_address,
            record.risk_score,
            record.risk_level.as_str(),
            record.created_at,
        ],
    )?;
    tx.commit()?;
    Ok(())
}

fn select_history(conn: &Connection, address: &str, since: i64) -> AppResult<Vec<RiskHistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT scan_id, contract_address, risk_score, risk_level, recorded_at FROM risk_history \
         WHERE contract_address = ?1 AND recorded_at >= ?2 ORDER BY recorded_at DESC, id DESC",
    )?;
    let rows = stmt.query_map(params![address, since], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (scan_id, contract_address, risk_score, level, recorded_at) = row?;
        entries.push(RiskHistoryEntry {
            scan_id,
            contract_address,
            risk_score,
            risk_level: level.parse::<RiskLevel>()?,
            recorded_at,
        });
    }
    Ok(entries)
}

#[async_trait]
impl AnalysisRepository for SqliteRepository {
    async fn save_analysis(&self, record: &AnalysisRecord) -> AppResult<bool> {
        let record = record.clone();
        let scan_id = record.scan_id.clone();
        self.with_conn(move |conn| insert_record(conn, &record)).await?;
        debug!("🗄️ Saved analysis log {}", scan_id);
        Ok(true)
    }

    async fn get_history(&self, address: &str, days: u32) -> AppResult<Vec<RiskHistoryEntry>> {
        let address = address.to_lowercase();
        let since = chrono::Utc::now().timestamp() - i64::from(days) * 86_400;
        self.with_conn(move |conn| select_history(conn, &address, since))
            .await
    }

    async fn get_recent(&self, limit: usize) -> AppResult<Vec<AnalysisRecord>> {
        let limit = limit.min(i64::MAX as usize) as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{} ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                SELECT_RECORD
            ))?;
            let rows = stmt.query_map(params![limit], RawRecord::from_row)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?.decode()?);
            }
            Ok(records)
        })
        .await
    }

    async fn get_by_scan_id(&self, scan_id: &str) -> AppResult<Option<AnalysisRecord>> {
        let scan_id = scan_id.to_string();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    &format!("{} WHERE scan_id = ?1", SELECT_RECORD),
                    params![scan_id],
                    RawRecord::from_row,
                )
                .optional()?;
            raw.map(RawRecord::decode).transpose()
        })
        .await
    }
}
