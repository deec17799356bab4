mod analysis;
mod config;
mod db;
mod errors;
mod llm_client;
mod models;
mod routes;
mod state;
mod store;

use anyhow::Result;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::config::Config;
use crate::db::{create_pool, init_schema};
use crate::llm_client::{mask_api_key, LlmClient};
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{AnalysisStore, MemoryAnalysisStore, PgAnalysisStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CareerLens API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize storage: PostgreSQL when configured, in-memory otherwise
    let store: Arc<dyn AnalysisStore> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            init_schema(&pool).await?;
            Arc::new(PgAnalysisStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; analyses are kept in memory only");
            Arc::new(MemoryAnalysisStore::new())
        }
    };

    // Initialize LLM client
    let llm = LlmClient::new(config.llm.clone())?;
    match config.llm.default_key() {
        Some(key) => info!(
            "LLM client initialized (model: {}, key: {})",
            config.llm.model,
            mask_api_key(key)
        ),
        None => warn!(
            "LLM client initialized without a default API key (model: {}); requests must supply llm_api_key",
            config.llm.model
        ),
    }

    // Build app state
    let state = AppState {
        llm: Arc::new(llm),
        store,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
