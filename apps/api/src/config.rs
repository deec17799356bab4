use anyhow::{Context, Result};

use crate::llm_client::{
    LlmDefaults, DEFAULT_ANTHROPIC_BASE, DEFAULT_API_BASE, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS,
};

/// Application configuration loaded from environment variables.
/// Nothing is required: without `DATABASE_URL` analyses live in memory, and
/// without an API key every request must bring its own.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub llm: LlmDefaults,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            llm: LlmDefaults {
                model: optional_env("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                api_base: optional_env("LLM_API_BASE")
                    .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                anthropic_base: optional_env("ANTHROPIC_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE.to_string()),
                api_key: optional_env("DEEPSEEK_API_KEY").or_else(|| optional_env("OPENAI_API_KEY")),
                anthropic_api_key: optional_env("ANTHROPIC_AUTH_TOKEN"),
                timeout_secs: match optional_env("LLM_TIMEOUT_SECS") {
                    Some(raw) => raw
                        .parse::<u64>()
                        .context("LLM_TIMEOUT_SECS must be a whole number of seconds")?,
                    None => DEFAULT_TIMEOUT_SECS,
                },
            },
        })
    }
}

/// Unset and blank variables are both treated as absent.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
