use std::sync::Arc;

use crate::config::Config;
use crate::llm_client::CompletionProvider;
use crate::store::AnalysisStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Default: `LlmClient`. Tests swap in a scripted provider.
    pub llm: Arc<dyn CompletionProvider>,
    /// `PgAnalysisStore` when `DATABASE_URL` is set, otherwise `MemoryAnalysisStore`.
    pub store: Arc<dyn AnalysisStore>,
    pub config: Config,
}
