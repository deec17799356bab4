use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Tables are created idempotently at startup; there is no migration history.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS analyses (
        analysis_id   UUID PRIMARY KEY,
        resume_title  TEXT NOT NULL DEFAULT '',
        job_title     TEXT NOT NULL DEFAULT '',
        resume_text   TEXT NOT NULL,
        jd_text       TEXT NOT NULL,
        result_json   JSONB NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_analyses_created_at ON analyses (created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS analysis_drafts (
        analysis_id  UUID PRIMARY KEY REFERENCES analyses (analysis_id) ON DELETE CASCADE,
        result_json  JSONB NOT NULL,
        history      JSONB NOT NULL DEFAULT '[]'::jsonb,
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Creates the analysis tables if they do not exist yet.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Database schema ready");
    Ok(())
}
