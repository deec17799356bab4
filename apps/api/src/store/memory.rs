use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{decode_history, push_history, AnalysisStore, StoreError};
use crate::models::analysis::FullAnalysisResult;
use crate::models::record::{AnalysisRow, AnalysisSummary, DraftRow};

/// Process-local store. Rows hold the same JSON the database would, so the
/// (de)serialization path matches `PgAnalysisStore`.
#[derive(Default)]
pub struct MemoryAnalysisStore {
    analyses: RwLock<Vec<AnalysisRow>>,
    drafts: RwLock<HashMap<Uuid, DraftRow>>,
}

impl MemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn analysis_count(&self) -> usize {
        self.analyses.read().await.len()
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn save_analysis(
        &self,
        resume_text: &str,
        jd_text: &str,
        result: &FullAnalysisResult,
    ) -> Result<Uuid, StoreError> {
        let row = AnalysisRow {
            analysis_id: Uuid::new_v4(),
            resume_title: result.resume_profile.title.clone(),
            job_title: result.job_profile.title.clone(),
            resume_text: resume_text.to_string(),
            jd_text: jd_text.to_string(),
            result_json: serde_json::to_value(result)?,
            created_at: Utc::now(),
        };
        let id = row.analysis_id;
        self.analyses.write().await.push(row);
        Ok(id)
    }

    async fn load_analysis(&self, id: Uuid) -> Result<Option<FullAnalysisResult>, StoreError> {
        let analyses = self.analyses.read().await;
        match analyses.iter().find(|row| row.analysis_id == id) {
            Some(row) => Ok(Some(serde_json::from_value(row.result_json.clone())?)),
            None => Ok(None),
        }
    }

    async fn list_analyses(&self, limit: usize) -> Result<Vec<AnalysisSummary>, StoreError> {
        let analyses = self.analyses.read().await;
        // Insertion order is creation order.
        Ok(analyses
            .iter()
            .rev()
            .take(limit)
            .map(|row| AnalysisSummary {
                analysis_id: row.analysis_id,
                resume_title: row.resume_title.clone(),
                job_title: row.job_title.clone(),
                created_at: row.created_at,
            })
            .collect())
    }

    async fn save_draft(&self, id: Uuid, result: &FullAnalysisResult) -> Result<(), StoreError> {
        let result_json = serde_json::to_value(result)?;
        let mut drafts = self.drafts.write().await;
        let history = match drafts.remove(&id) {
            Some(previous) => push_history(previous.history, previous.result_json),
            None => Value::Array(Vec::new()),
        };
        drafts.insert(
            id,
            DraftRow {
                analysis_id: id,
                result_json,
                history,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn load_draft(&self, id: Uuid) -> Result<Option<FullAnalysisResult>, StoreError> {
        let drafts = self.drafts.read().await;
        match drafts.get(&id) {
            Some(row) => Ok(Some(serde_json::from_value(row.result_json.clone())?)),
            None => Ok(None),
        }
    }

    async fn draft_history(&self, id: Uuid) -> Result<Vec<FullAnalysisResult>, StoreError> {
        let drafts = self.drafts.read().await;
        Ok(drafts
            .get(&id)
            .map(|row| decode_history(row.history.clone()))
            .unwrap_or_default())
    }

    async fn clear_draft(&self, id: Uuid) -> Result<(), StoreError> {
        self.drafts.write().await.remove(&id);
        Ok(())
    }
}
