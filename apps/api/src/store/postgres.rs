use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::{decode_history, push_history, AnalysisStore, StoreError};
use crate::models::analysis::FullAnalysisResult;
use crate::models::record::{AnalysisRow, AnalysisSummary, DraftRow};

/// PostgreSQL-backed store. Results live in JSONB columns.
#[derive(Clone)]
pub struct PgAnalysisStore {
    pool: PgPool,
}

impl PgAnalysisStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalysisStore for PgAnalysisStore {
    async fn save_analysis(
        &self,
        resume_text: &str,
        jd_text: &str,
        result: &FullAnalysisResult,
    ) -> Result<Uuid, StoreError> {
        let analysis_id = Uuid::new_v4();
        let result_json = serde_json::to_value(result)?;

        sqlx::query(
            r#"
            INSERT INTO analyses
                (analysis_id, resume_title, job_title, resume_text, jd_text, result_json, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(analysis_id)
        .bind(&result.resume_profile.title)
        .bind(&result.job_profile.title)
        .bind(resume_text)
        .bind(jd_text)
        .bind(&result_json)
        .execute(&self.pool)
        .await?;

        info!("Saved analysis {analysis_id}");
        Ok(analysis_id)
    }

    async fn load_analysis(&self, id: Uuid) -> Result<Option<FullAnalysisResult>, StoreError> {
        let row = sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT analysis_id, resume_title, job_title, resume_text, jd_text, result_json, created_at
            FROM analyses
            WHERE analysis_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_value(row.result_json)?)),
            None => Ok(None),
        }
    }

    async fn list_analyses(&self, limit: usize) -> Result<Vec<AnalysisSummary>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(sqlx::query_as::<_, AnalysisSummary>(
            r#"
            SELECT analysis_id, resume_title, job_title, created_at
            FROM analyses
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn save_draft(&self, id: Uuid, result: &FullAnalysisResult) -> Result<(), StoreError> {
        let result_json = serde_json::to_value(result)?;
        let mut tx = self.pool.begin().await?;

        // First save: the insert wins or waits on the key of a concurrent one.
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO analysis_drafts (analysis_id, result_json, history, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (analysis_id) DO NOTHING
            RETURNING analysis_id
            "#,
        )
        .bind(id)
        .bind(&result_json)
        .bind(Value::Array(Vec::new()))
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            // The row exists, so the lock holds until commit.
            let previous = sqlx::query_as::<_, DraftRow>(
                r#"
                SELECT analysis_id, result_json, history, updated_at
                FROM analysis_drafts
                WHERE analysis_id = $1
                FOR UPDATE
                "#,
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

            let history = push_history(previous.history, previous.result_json);
            sqlx::query(
                r#"
                UPDATE analysis_drafts
                SET result_json = $2, history = $3, updated_at = NOW()
                WHERE analysis_id = $1
                "#,
            )
            .bind(id)
            .bind(&result_json)
            .bind(&history)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Saved draft for analysis {id}");
        Ok(())
    }

    async fn load_draft(&self, id: Uuid) -> Result<Option<FullAnalysisResult>, StoreError> {
        let result_json: Option<Value> =
            sqlx::query_scalar("SELECT result_json FROM analysis_drafts WHERE analysis_id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match result_json {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn draft_history(&self, id: Uuid) -> Result<Vec<FullAnalysisResult>, StoreError> {
        let history: Option<Value> =
            sqlx::query_scalar("SELECT history FROM analysis_drafts WHERE analysis_id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(history.map(decode_history).unwrap_or_default())
    }

    async fn clear_draft(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM analysis_drafts WHERE analysis_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
