//! Analysis persistence.
//!
//! `AnalysisStore` is the seam between the HTTP/orchestrator layer and storage.
//! `PgAnalysisStore` backs it with PostgreSQL; `MemoryAnalysisStore` is used when
//! no database is configured and in tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::analysis::FullAnalysisResult;
use crate::models::record::AnalysisSummary;

pub use memory::MemoryAnalysisStore;
pub use postgres::PgAnalysisStore;

/// Prior draft versions kept per analysis, most recent first.
pub const DRAFT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Persists a completed run and returns its new id.
    async fn save_analysis(
        &self,
        resume_text: &str,
        jd_text: &str,
        result: &FullAnalysisResult,
    ) -> Result<Uuid, StoreError>;

    async fn load_analysis(&self, id: Uuid) -> Result<Option<FullAnalysisResult>, StoreError>;

    /// Newest first.
    async fn list_analyses(&self, limit: usize) -> Result<Vec<AnalysisSummary>, StoreError>;

    /// Replaces the draft, pushing the previous one onto its history.
    /// Callers check that the analysis exists first.
    async fn save_draft(&self, id: Uuid, result: &FullAnalysisResult) -> Result<(), StoreError>;

    async fn load_draft(&self, id: Uuid) -> Result<Option<FullAnalysisResult>, StoreError>;

    async fn draft_history(&self, id: Uuid) -> Result<Vec<FullAnalysisResult>, StoreError>;

    async fn clear_draft(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Puts `previous` at the front of a JSON history array, keeping at most
/// `DRAFT_HISTORY_LIMIT` entries. A non-array history starts over.
pub(crate) fn push_history(history: Value, previous: Value) -> Value {
    let mut entries = match history {
        Value::Array(entries) => entries,
        _ => Vec::new(),
    };
    entries.insert(0, previous);
    entries.truncate(DRAFT_HISTORY_LIMIT);
    Value::Array(entries)
}

/// Decodes a stored history array. Entries that no longer match the schema are dropped.
pub(crate) fn decode_history(history: Value) -> Vec<FullAnalysisResult> {
    match history {
        Value::Array(entries) => entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect(),
        _ => Vec::new(),
    }
}
