pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::analysis::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Analysis
        .route("/api/v1/analyze", post(handlers::handle_analyze))
        .route(
            "/api/v1/analyze/stream",
            post(handlers::handle_analyze_stream),
        )
        .route("/api/v1/resume/only", post(handlers::handle_resume_only))
        .route("/api/v1/job/only", post(handlers::handle_job_only))
        .route(
            "/api/v1/resume/customize",
            post(handlers::handle_customize_resume),
        )
        // History and drafts
        .route("/api/v1/history", get(handlers::handle_history))
        .route("/api/v1/history/:id", get(handlers::handle_history_detail))
        .route(
            "/api/v1/analysis/:id/draft",
            get(handlers::handle_get_draft)
                .put(handlers::handle_save_draft)
                .delete(handlers::handle_clear_draft),
        )
        .route(
            "/api/v1/analysis/:id/draft/history",
            get(handlers::handle_draft_history),
        )
        // Provider settings
        .route("/api/v1/llm/config", get(handlers::handle_llm_config))
        .with_state(state)
}
