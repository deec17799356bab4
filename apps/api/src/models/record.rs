use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// One completed pipeline run. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisRow {
    pub analysis_id: Uuid,
    pub resume_title: String,
    pub job_title: String,
    pub resume_text: String,
    pub jd_text: String,
    pub result_json: Value,
    pub created_at: DateTime<Utc>,
}

/// User-edited overlay on top of an analysis. `history` holds previous
/// versions of `result_json`, most recent first.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DraftRow {
    pub analysis_id: Uuid,
    pub result_json: Value,
    pub history: Value,
    pub updated_at: DateTime<Utc>,
}

/// Listing entry for the history view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AnalysisSummary {
    pub analysis_id: Uuid,
    pub resume_title: String,
    pub job_title: String,
    pub created_at: DateTime<Utc>,
}
