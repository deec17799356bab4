use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt as _};
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::orchestrator::{StreamEvent, StreamingOrchestrator, EVENT_BUFFER};
use crate::analysis::pipeline::AnalysisPipeline;
use crate::errors::AppError;
use crate::llm_client::{mask_api_key, LlmOverrides};
use crate::models::analysis::{FullAnalysisResult, Profile};
use crate::models::record::AnalysisSummary;
use crate::state::AppState;

/// Summaries returned by `GET /api/v1/history`.
const HISTORY_LIMIT: usize = 50;

/// Per-request provider overrides shared by every LLM-backed body.
#[derive(Debug, Default, Deserialize)]
pub struct LlmOptions {
    pub llm_api_key: Option<String>,
    pub llm_api_base: Option<String>,
    pub llm_model: Option<String>,
}

impl LlmOptions {
    fn overrides(&self) -> LlmOverrides {
        LlmOverrides::new(
            self.llm_api_key.clone(),
            self.llm_api_base.clone(),
            self.llm_model.clone(),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub resume_text: String,
    pub jd_text: String,
    pub client_run_id: Option<String>,
    #[serde(flatten)]
    pub llm: LlmOptions,
}

#[derive(Debug, Deserialize)]
pub struct ResumeOnlyRequest {
    pub resume_text: String,
    #[serde(flatten)]
    pub llm: LlmOptions,
}

#[derive(Debug, Deserialize)]
pub struct JobOnlyRequest {
    pub jd_text: String,
    #[serde(flatten)]
    pub llm: LlmOptions,
}

#[derive(Debug, Deserialize)]
pub struct CustomizeRequest {
    pub resume_text: String,
    pub jd_text: String,
    #[serde(flatten)]
    pub llm: LlmOptions,
}

#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    pub result: FullAnalysisResult,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub analysis_id: Uuid,
    pub result: FullAnalysisResult,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub profile: Profile,
}

#[derive(Debug, Serialize)]
pub struct CustomizeResponse {
    pub custom_resume_markdown: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryDetailResponse {
    pub analysis_id: Uuid,
    pub result: FullAnalysisResult,
    pub draft_result: Option<FullAnalysisResult>,
}

#[derive(Debug, Serialize)]
pub struct DraftHistoryResponse {
    pub analysis_id: Uuid,
    pub history: Vec<FullAnalysisResult>,
}

#[derive(Debug, Serialize)]
pub struct LlmConfigResponse {
    pub default_model: String,
    pub default_api_base: String,
    pub default_anthropic_base: String,
    pub has_default_key: bool,
    pub masked_key: Option<String>,
}

fn require_text(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn pipeline(state: &AppState, llm: &LlmOptions) -> AnalysisPipeline {
    AnalysisPipeline::new(state.llm.clone(), llm.overrides())
}

/// POST /api/v1/analyze
pub async fn handle_analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisResponse>, AppError> {
    require_text("resume_text", &req.resume_text)?;
    require_text("jd_text", &req.jd_text)?;

    let result = pipeline(&state, &req.llm)
        .run_full_analysis(&req.resume_text, &req.jd_text)
        .await?;
    let analysis_id = state
        .store
        .save_analysis(&req.resume_text, &req.jd_text, &result)
        .await?;

    info!("Analysis {analysis_id} completed");
    Ok(Json(AnalysisResponse {
        analysis_id,
        result,
    }))
}

/// POST /api/v1/analyze/stream
///
/// The orchestrator runs on its own task; dropping the response closes the
/// channel and ends the run at the next stage boundary.
pub async fn handle_analyze_stream(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_text("resume_text", &req.resume_text)?;
    require_text("jd_text", &req.jd_text)?;

    let run_id = req
        .client_run_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let orchestrator = StreamingOrchestrator::new(
        pipeline(&state, &req.llm),
        state.store.clone(),
        run_id,
        req.resume_text,
        req.jd_text,
    );

    let (tx, rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
    tokio::spawn(async move {
        orchestrator.run(tx).await;
    });

    let stream = ReceiverStream::new(rx).filter_map(|event| {
        match Event::default().event(event.name()).json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                warn!("Dropping unserializable {} event: {e}", event.name());
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// POST /api/v1/resume/only
pub async fn handle_resume_only(
    State(state): State<AppState>,
    Json(req): Json<ResumeOnlyRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    require_text("resume_text", &req.resume_text)?;
    let profile = pipeline(&state, &req.llm)
        .parse_resume_only(&req.resume_text)
        .await?;
    Ok(Json(ProfileResponse { profile }))
}

/// POST /api/v1/job/only
pub async fn handle_job_only(
    State(state): State<AppState>,
    Json(req): Json<JobOnlyRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    require_text("jd_text", &req.jd_text)?;
    let profile = pipeline(&state, &req.llm).parse_job_only(&req.jd_text).await?;
    Ok(Json(ProfileResponse { profile }))
}

/// POST /api/v1/resume/customize
pub async fn handle_customize_resume(
    State(state): State<AppState>,
    Json(req): Json<CustomizeRequest>,
) -> Result<Json<CustomizeResponse>, AppError> {
    require_text("resume_text", &req.resume_text)?;
    require_text("jd_text", &req.jd_text)?;
    let output = pipeline(&state, &req.llm)
        .customize_resume(&req.resume_text, &req.jd_text, false)
        .await?;
    Ok(Json(CustomizeResponse {
        custom_resume_markdown: output.value,
    }))
}

/// GET /api/v1/history
pub async fn handle_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<AnalysisSummary>>, AppError> {
    Ok(Json(state.store.list_analyses(HISTORY_LIMIT).await?))
}

/// GET /api/v1/history/:id
pub async fn handle_history_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<HistoryDetailResponse>, AppError> {
    let result = state
        .store
        .load_analysis(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Analysis {id} not found")))?;

    // A broken draft must not hide the analysis itself.
    let draft_result = match state.store.load_draft(id).await {
        Ok(draft) => draft,
        Err(e) => {
            warn!("Failed to load draft for analysis {id}: {e}");
            None
        }
    };

    Ok(Json(HistoryDetailResponse {
        analysis_id: id,
        result,
        draft_result,
    }))
}

/// GET /api/v1/analysis/:id/draft
pub async fn handle_get_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnalysisResponse>, AppError> {
    let result = state
        .store
        .load_draft(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No draft for analysis {id}")))?;
    Ok(Json(AnalysisResponse {
        analysis_id: id,
        result,
    }))
}

/// PUT /api/v1/analysis/:id/draft
pub async fn handle_save_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DraftRequest>,
) -> Result<Json<AnalysisResponse>, AppError> {
    if state.store.load_analysis(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Analysis {id} not found")));
    }
    state.store.save_draft(id, &req.result).await?;
    Ok(Json(AnalysisResponse {
        analysis_id: id,
        result: req.result,
    }))
}

/// DELETE /api/v1/analysis/:id/draft
pub async fn handle_clear_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.store.clear_draft(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/analysis/:id/draft/history
pub async fn handle_draft_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DraftHistoryResponse>, AppError> {
    let history = state.store.draft_history(id).await?;
    Ok(Json(DraftHistoryResponse {
        analysis_id: id,
        history,
    }))
}

/// GET /api/v1/llm/config
pub async fn handle_llm_config(State(state): State<AppState>) -> Json<LlmConfigResponse> {
    let defaults = &state.config.llm;
    let default_key = defaults.default_key();
    Json(LlmConfigResponse {
        default_model: defaults.model.clone(),
        default_api_base: defaults.api_base.clone(),
        default_anthropic_base: defaults.anthropic_base.clone(),
        has_default_key: default_key.is_some(),
        masked_key: default_key.map(mask_api_key),
    })
}
