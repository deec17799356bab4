/// LLM Client: the single point of entry for all provider calls.
///
/// No other module talks to a model provider directly. Stages go through the
/// `CompletionProvider` trait, which `LlmClient` implements over HTTP.
///
/// Two wire dialects are spoken, picked by inspecting the endpoint and model
/// name: the OpenAI-compatible chat-completions API (DeepSeek, OpenAI, ...)
/// and the Anthropic Messages API.
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod prompts;
pub mod stream;

use self::prompts::SYSTEM_PROMPT;
use self::stream::DeltaAccumulator;

pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_API_BASE: &str = "https://api.deepseek.com";
pub const DEFAULT_ANTHROPIC_BASE: &str = "https://api.anthropic.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";
const ANTHROPIC_MESSAGES_PATH: &str = "/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 2048;
const TEMPERATURE: f32 = 0.2;
/// Upper bound on how much of a provider body is copied into an error.
pub const ERROR_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM configuration error: {0}")]
    Config(String),

    #[error("Failed to call LLM provider: {0}")]
    Http(reqwest::Error),

    #[error("LLM provider did not answer in time: {0}")]
    Timeout(String),

    #[error("LLM provider error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected LLM response format ({message}): {excerpt}")]
    Parse { message: String, excerpt: String },
}

/// Timeouts are told apart from other transport failures: a provider that
/// is too slow is reported as a provider problem.
impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout(e.to_string())
        } else {
            LlmError::Http(e)
        }
    }
}

/// Returns at most `max_chars` characters of `text`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Masks a credential for display: `sk-123...7890`.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let (head, tail) = if chars.len() <= 10 { (2, 2) } else { (6, 4) };
    let head: String = chars.iter().take(head).collect();
    let tail: String = chars[chars.len().saturating_sub(tail)..].iter().collect();
    format!("{head}...{tail}")
}

/// Reasoning-capable models stream a separate `reasoning_content` channel and
/// reject sampling parameters such as `temperature`.
pub fn is_reasoning_model(model: &str) -> bool {
    model.to_ascii_lowercase().contains("reasoner")
}

/// Process-wide defaults, resolved once from the environment at startup.
#[derive(Debug, Clone)]
pub struct LlmDefaults {
    pub model: String,
    pub api_base: String,
    pub anthropic_base: String,
    pub api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmDefaults {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            anthropic_base: DEFAULT_ANTHROPIC_BASE.to_string(),
            api_key: None,
            anthropic_api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl LlmDefaults {
    /// The credential a request without overrides would use, matching the
    /// dialect of the default model and base.
    pub fn default_key(&self) -> Option<&str> {
        match Dialect::detect(Some(&self.api_base), &self.model) {
            Dialect::Anthropic => self.anthropic_api_key.as_deref(),
            Dialect::OpenAiCompatible => self.api_key.as_deref(),
        }
    }
}

/// Per-request overrides. Unset fields fall back to `LlmDefaults`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LlmOverrides {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub model: Option<String>,
}

impl LlmOverrides {
    /// Treats blank strings the same as absent ones.
    pub fn new(api_key: Option<String>, api_base: Option<String>, model: Option<String>) -> Self {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Self {
            api_key: non_blank(api_key),
            api_base: non_blank(api_base),
            model: non_blank(model),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `choices[].delta.content` stream / `choices[0].message.content` body.
    OpenAiCompatible,
    /// `content[]` blocks of `{type, text}`.
    Anthropic,
}

impl Dialect {
    pub fn detect(api_base: Option<&str>, model: &str) -> Self {
        let base = api_base.unwrap_or_default().to_ascii_lowercase();
        if base.contains("anthropic")
            || base.contains("jiuwan")
            || model.to_ascii_lowercase().contains("claude")
        {
            Dialect::Anthropic
        } else {
            Dialect::OpenAiCompatible
        }
    }
}

/// A fully resolved call target: endpoint URL, model and credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub dialect: Dialect,
    pub url: String,
    pub model: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub overrides: &'a LlmOverrides,
    pub include_reasoning: bool,
    pub stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub reasoning: Option<String>,
}

/// Anything that turns a prompt into model text. `LlmClient` is the HTTP
/// implementation; stages only see this trait.
///
/// Carried in `AppState` as `Arc<dyn CompletionProvider>`.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError>;

    /// Model used when a request does not override it.
    fn default_model(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicResponse {
    fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

/// HTTP client for both provider dialects. Cheap to clone.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    defaults: LlmDefaults,
}

impl LlmClient {
    pub fn new(defaults: LlmDefaults) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults.timeout_secs))
            .build()?;
        Ok(Self { client, defaults })
    }

    /// Resolves dialect, URL, model and credential. Fails before any network
    /// traffic when no credential is available.
    pub fn resolve(&self, overrides: &LlmOverrides) -> Result<Target, LlmError> {
        let model = overrides
            .model
            .clone()
            .unwrap_or_else(|| self.defaults.model.clone());
        let dialect = Dialect::detect(overrides.api_base.as_deref(), &model);

        let (base, default_key, key_hint) = match dialect {
            Dialect::Anthropic => (
                overrides
                    .api_base
                    .as_deref()
                    .unwrap_or(&self.defaults.anthropic_base),
                self.defaults.anthropic_api_key.as_ref(),
                "ANTHROPIC_AUTH_TOKEN",
            ),
            Dialect::OpenAiCompatible => (
                overrides
                    .api_base
                    .as_deref()
                    .unwrap_or(&self.defaults.api_base),
                self.defaults.api_key.as_ref(),
                "DEEPSEEK_API_KEY or OPENAI_API_KEY",
            ),
        };

        let api_key = overrides
            .api_key
            .as_ref()
            .or(default_key)
            .cloned()
            .ok_or_else(|| {
                LlmError::Config(format!(
                    "Missing API key. Set {key_hint} or pass one with the request."
                ))
            })?;

        let url = match dialect {
            Dialect::Anthropic => join_url(base, ANTHROPIC_MESSAGES_PATH),
            Dialect::OpenAiCompatible => {
                if base.trim_end_matches('/').ends_with("chat/completions") {
                    base.to_string()
                } else {
                    join_url(base, CHAT_COMPLETIONS_PATH)
                }
            }
        };

        Ok(Target {
            dialect,
            url,
            model,
            api_key,
        })
    }

    async fn call_openai(
        &self,
        target: &Target,
        prompt: &str,
        include_reasoning: bool,
        stream: bool,
    ) -> Result<Completion, LlmError> {
        let body = ChatRequest {
            model: &target.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: (!is_reasoning_model(&target.model)).then_some(TEMPERATURE),
            stream,
        };

        let response = self
            .client
            .post(&target.url)
            .bearer_auth(&target.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        if stream {
            let mut accumulator = DeltaAccumulator::new(include_reasoning);
            let mut chunks = response.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                if accumulator.push_chunk(&chunk?) {
                    break;
                }
            }
            let completion = accumulator.finish();
            debug!(
                "LLM stream finished: model={}, chars={}",
                target.model,
                completion.text.len()
            );
            return Ok(completion);
        }

        let text = response.text().await?;
        let mut completion = parse_chat_response(&text)?;
        if !include_reasoning {
            completion.reasoning = None;
        }
        Ok(completion)
    }

    async fn call_anthropic(&self, target: &Target, prompt: &str) -> Result<Completion, LlmError> {
        let body = AnthropicRequest {
            model: &target.model,
            max_tokens: ANTHROPIC_MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        let response = self
            .client
            .post(&target.url)
            .header("x-api-key", &target.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_anthropic_response(&text)
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
        if request.prompt.trim().is_empty() {
            return Err(LlmError::Config("prompt must not be empty".to_string()));
        }

        let target = self.resolve(request.overrides)?;
        debug!(
            "LLM call: dialect={:?}, model={}, url={}, stream={}",
            target.dialect, target.model, target.url, request.stream
        );

        match target.dialect {
            // Anthropic responses are always aggregated server-side.
            Dialect::Anthropic => self.call_anthropic(&target, request.prompt).await,
            Dialect::OpenAiCompatible => {
                self.call_openai(
                    &target,
                    request.prompt,
                    request.include_reasoning,
                    request.stream,
                )
                .await
            }
        }
    }

    fn default_model(&self) -> &str {
        &self.defaults.model
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

fn parse_failure(message: impl Into<String>, body: &str) -> LlmError {
    LlmError::Parse {
        message: message.into(),
        excerpt: excerpt(body, ERROR_EXCERPT_CHARS),
    }
}

/// Extracts `choices[0].message.content` (and `reasoning_content`) from a
/// non-streaming chat-completions body.
fn parse_chat_response(body: &str) -> Result<Completion, LlmError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| parse_failure(e.to_string(), body))?;

    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| parse_failure("no choices", body))?;

    let text = message
        .content
        .ok_or_else(|| parse_failure("missing message content", body))?;

    Ok(Completion {
        text: text.trim().to_string(),
        reasoning: message
            .reasoning_content
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
    })
}

/// Extracts the first text block of an Anthropic Messages body.
fn parse_anthropic_response(body: &str) -> Result<Completion, LlmError> {
    let response: AnthropicResponse =
        serde_json::from_str(body).map_err(|e| parse_failure(e.to_string(), body))?;

    if let Some(usage) = &response.usage {
        debug!(
            "Anthropic call succeeded: input_tokens={}, output_tokens={}",
            usage.input_tokens, usage.output_tokens
        );
    }

    let text = response
        .text()
        .ok_or_else(|| parse_failure("no text block in content", body))?;

    Ok(Completion {
        text: text.trim().to_string(),
        reasoning: None,
    })
}
