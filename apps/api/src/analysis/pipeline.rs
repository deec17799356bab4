//! Stage Pipeline: the four LLM-backed transformation steps.
//!
//! Flow: extract_profiles → analyze_gaps → plan_learning, plus
//!       customize_resume which only needs the raw texts.
//!
//! Every stage builds its prompt, calls the provider, normalizes the text into
//! JSON, checks the expected top-level keys and deserializes them into the typed
//! schema. A stage never retries; errors go straight back to the caller.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::analysis::normalize::{canonicalize_mapping_coverage, parse_json};
use crate::analysis::prompts::{
    build_custom_resume_prompt, build_gap_analysis_prompt, build_learning_plan_prompt,
    build_parse_profile_prompt, JOB_PLACEHOLDER, RESUME_PLACEHOLDER,
};
use crate::llm_client::{
    excerpt, is_reasoning_model, Completion, CompletionProvider, CompletionRequest, LlmError,
    LlmOverrides, ERROR_EXCERPT_CHARS,
};
use crate::models::analysis::{
    FullAnalysisResult, GapAnalysisResult, JdMappingMatrix, LearningPlan, Profile,
};

/// Tolerance before a model-supplied priority is reported as inconsistent.
const PRIORITY_TOLERANCE: f64 = 0.05;

/// The four pipeline stages, named as they appear on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ParseProfile,
    GapAnalysis,
    LearningPlan,
    CustomResume,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ParseProfile => "parse_profile",
            Stage::GapAnalysis => "gap_analysis",
            Stage::LearningPlan => "learning_plan",
            Stage::CustomResume => "custom_resume",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-visible failure classes. `Persistence` never comes from a stage; the
/// orchestrator uses it for store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Transport,
    Provider,
    Validation,
    Persistence,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Failed to parse LLM JSON: {message}: {excerpt}")]
    InvalidJson { message: String, excerpt: String },

    #[error("Missing {key} in LLM response: {excerpt}")]
    MissingKey { key: &'static str, excerpt: String },

    #[error("{key} in LLM response must be {expected}: {excerpt}")]
    InvalidType {
        key: &'static str,
        expected: &'static str,
        excerpt: String,
    },

    #[error("LLM {stage} output does not match the schema: {message}: {excerpt}")]
    Schema {
        stage: Stage,
        message: String,
        excerpt: String,
    },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Llm(LlmError::Config(_)) => ErrorKind::Configuration,
            PipelineError::Llm(LlmError::Http(_)) => ErrorKind::Transport,
            PipelineError::Llm(
                LlmError::Timeout(_) | LlmError::Api { .. } | LlmError::Parse { .. },
            ) => ErrorKind::Provider,
            PipelineError::InvalidJson { .. }
            | PipelineError::MissingKey { .. }
            | PipelineError::InvalidType { .. }
            | PipelineError::Schema { .. } => ErrorKind::Validation,
        }
    }
}

/// A stage result plus, when captured, the raw provider text and reasoning.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput<T> {
    pub value: T,
    pub raw: Option<String>,
    pub reasoning: Option<String>,
}

impl<T> StageOutput<T> {
    fn new(value: T, completion: Completion, capture: bool) -> Self {
        if capture {
            Self {
                value,
                raw: Some(completion.text),
                reasoning: completion.reasoning,
            }
        } else {
            Self {
                value,
                raw: None,
                reasoning: None,
            }
        }
    }
}

/// Runs stages against one provider with one set of per-request overrides.
#[derive(Clone)]
pub struct AnalysisPipeline {
    llm: Arc<dyn CompletionProvider>,
    overrides: LlmOverrides,
}

impl AnalysisPipeline {
    pub fn new(llm: Arc<dyn CompletionProvider>, overrides: LlmOverrides) -> Self {
        Self { llm, overrides }
    }

    /// The model the provider will actually be asked for.
    pub fn model(&self) -> &str {
        self.overrides
            .model
            .as_deref()
            .unwrap_or_else(|| self.llm.default_model())
    }

    pub fn reasoning_mode(&self) -> bool {
        is_reasoning_model(self.model())
    }

    async fn call(
        &self,
        stage: Stage,
        prompt: &str,
        capture: bool,
    ) -> Result<(Completion, Map<String, Value>), PipelineError> {
        debug!("Calling LLM for stage {stage} (model: {})", self.model());
        let completion = self
            .llm
            .complete(CompletionRequest {
                prompt,
                overrides: &self.overrides,
                include_reasoning: capture,
                stream: true,
            })
            .await?;

        let data = match parse_json(&completion.text)? {
            Value::Object(map) => map,
            other => {
                return Err(PipelineError::Schema {
                    stage,
                    message: format!("expected a JSON object, got {}", json_type(&other)),
                    excerpt: excerpt(&completion.text, ERROR_EXCERPT_CHARS),
                })
            }
        };
        Ok((completion, data))
    }

    /// Stage 1: structured profiles for both sides.
    ///
    /// A blank side is replaced by a placeholder asking the model for an
    /// empty stub, so both keys are always required.
    pub async fn extract_profiles(
        &self,
        resume_text: &str,
        jd_text: &str,
        capture: bool,
    ) -> Result<StageOutput<(Profile, Profile)>, PipelineError> {
        let resume_text = or_placeholder(resume_text, RESUME_PLACEHOLDER);
        let jd_text = or_placeholder(jd_text, JOB_PLACEHOLDER);
        let prompt = build_parse_profile_prompt(resume_text, jd_text);

        let (completion, mut data) = self.call(Stage::ParseProfile, &prompt, capture).await?;
        require_keys(&data, &["resume_profile", "job_profile"], &completion.text)?;

        let resume_profile: Profile =
            take_key(&mut data, "resume_profile", Stage::ParseProfile, &completion.text)?;
        let job_profile: Profile =
            take_key(&mut data, "job_profile", Stage::ParseProfile, &completion.text)?;

        info!(
            "Profiles extracted: resume='{}', job='{}'",
            resume_profile.title, job_profile.title
        );
        Ok(StageOutput::new(
            (resume_profile, job_profile),
            completion,
            capture,
        ))
    }

    /// Stage 2: scored gaps and the requirement-coverage matrix.
    pub async fn analyze_gaps(
        &self,
        resume_profile: &Profile,
        job_profile: &Profile,
        capture: bool,
    ) -> Result<StageOutput<(GapAnalysisResult, JdMappingMatrix)>, PipelineError> {
        let prompt = build_gap_analysis_prompt(
            &to_prompt_json(resume_profile, Stage::GapAnalysis)?,
            &to_prompt_json(job_profile, Stage::GapAnalysis)?,
        );

        let (completion, mut data) = self.call(Stage::GapAnalysis, &prompt, capture).await?;
        if let Some(matrix) = data.get_mut("jd_mapping_matrix") {
            canonicalize_mapping_coverage(matrix);
        }
        require_keys(&data, &["gap_analysis", "jd_mapping_matrix"], &completion.text)?;

        let gap_analysis: GapAnalysisResult =
            take_key(&mut data, "gap_analysis", Stage::GapAnalysis, &completion.text)?;
        let mapping: JdMappingMatrix =
            take_key(&mut data, "jd_mapping_matrix", Stage::GapAnalysis, &completion.text)?;

        gap_analysis
            .validate()
            .map_err(|message| PipelineError::Schema {
                stage: Stage::GapAnalysis,
                message,
                excerpt: excerpt(&completion.text, ERROR_EXCERPT_CHARS),
            })?;
        for gap in &gap_analysis.gaps {
            if (gap.priority - gap.expected_priority()).abs() > PRIORITY_TOLERANCE {
                debug!(
                    "Gap '{}' priority {} differs from importance*attainability {:.3}; keeping model value",
                    gap.id,
                    gap.priority,
                    gap.expected_priority()
                );
            }
        }

        info!(
            "Gap analysis: {} gaps, {} mapped requirements",
            gap_analysis.gaps.len(),
            mapping.resume_mapping.len()
        );
        Ok(StageOutput::new((gap_analysis, mapping), completion, capture))
    }

    /// Stage 3: a phased learning plan for the gaps.
    pub async fn plan_learning(
        &self,
        gap_analysis: &GapAnalysisResult,
        capture: bool,
    ) -> Result<StageOutput<LearningPlan>, PipelineError> {
        let prompt =
            build_learning_plan_prompt(&to_prompt_json(gap_analysis, Stage::LearningPlan)?);

        let (completion, mut data) = self.call(Stage::LearningPlan, &prompt, capture).await?;
        require_keys(&data, &["learning_plan"], &completion.text)?;
        let plan: LearningPlan =
            take_key(&mut data, "learning_plan", Stage::LearningPlan, &completion.text)?;

        info!("Learning plan: {} phases", plan.phases.len());
        Ok(StageOutput::new(plan, completion, capture))
    }

    /// Stage 4: the resume rewritten for the job, as Markdown.
    pub async fn customize_resume(
        &self,
        resume_text: &str,
        jd_text: &str,
        capture: bool,
    ) -> Result<StageOutput<String>, PipelineError> {
        let prompt = build_custom_resume_prompt(resume_text, jd_text);

        let (completion, mut data) = self.call(Stage::CustomResume, &prompt, capture).await?;
        let markdown = match data.remove("custom_resume_markdown") {
            None => {
                return Err(PipelineError::MissingKey {
                    key: "custom_resume_markdown",
                    excerpt: excerpt(&completion.text, ERROR_EXCERPT_CHARS),
                })
            }
            Some(Value::String(markdown)) => markdown,
            Some(_) => {
                return Err(PipelineError::InvalidType {
                    key: "custom_resume_markdown",
                    expected: "a string",
                    excerpt: excerpt(&completion.text, ERROR_EXCERPT_CHARS),
                })
            }
        };

        Ok(StageOutput::new(markdown, completion, capture))
    }

    /// Stage 1 with a job placeholder; returns the resume side only.
    pub async fn parse_resume_only(&self, resume_text: &str) -> Result<Profile, PipelineError> {
        let output = self.extract_profiles(resume_text, "", false).await?;
        Ok(output.value.0)
    }

    /// Stage 1 with a resume placeholder; returns the job side only.
    pub async fn parse_job_only(&self, jd_text: &str) -> Result<Profile, PipelineError> {
        let output = self.extract_profiles("", jd_text, false).await?;
        Ok(output.value.1)
    }

    /// Runs all four stages in order without capturing raw output.
    pub async fn run_full_analysis(
        &self,
        resume_text: &str,
        jd_text: &str,
    ) -> Result<FullAnalysisResult, PipelineError> {
        let (resume_profile, job_profile) =
            self.extract_profiles(resume_text, jd_text, false).await?.value;
        let (gap_analysis, jd_mapping_matrix) = self
            .analyze_gaps(&resume_profile, &job_profile, false)
            .await?
            .value;
        let learning_plan = self.plan_learning(&gap_analysis, false).await?.value;
        let custom_resume_markdown = self
            .customize_resume(resume_text, jd_text, false)
            .await?
            .value;

        Ok(FullAnalysisResult {
            resume_profile,
            job_profile,
            gap_analysis,
            jd_mapping_matrix,
            learning_plan,
            custom_resume_markdown,
        })
    }
}

fn or_placeholder<'a>(text: &'a str, placeholder: &'a str) -> &'a str {
    if text.trim().is_empty() {
        placeholder
    } else {
        text
    }
}

fn require_keys(
    data: &Map<String, Value>,
    keys: &[&'static str],
    raw: &str,
) -> Result<(), PipelineError> {
    match keys.iter().find(|k| !data.contains_key(**k)) {
        Some(key) => Err(PipelineError::MissingKey {
            key: *key,
            excerpt: excerpt(raw, ERROR_EXCERPT_CHARS),
        }),
        None => Ok(()),
    }
}

fn take_key<T: DeserializeOwned>(
    data: &mut Map<String, Value>,
    key: &'static str,
    stage: Stage,
    raw: &str,
) -> Result<T, PipelineError> {
    let value = data.remove(key).ok_or_else(|| PipelineError::MissingKey {
        key,
        excerpt: excerpt(raw, ERROR_EXCERPT_CHARS),
    })?;
    serde_json::from_value(value).map_err(|e| PipelineError::Schema {
        stage,
        message: format!("{key}: {e}"),
        excerpt: excerpt(raw, ERROR_EXCERPT_CHARS),
    })
}

fn to_prompt_json<T: Serialize + std::fmt::Debug>(
    value: &T,
    stage: Stage,
) -> Result<String, PipelineError> {
    serde_json::to_string(value).map_err(|e| PipelineError::Schema {
        stage,
        message: format!("failed to serialize stage input: {e}"),
        excerpt: excerpt(&format!("{value:?}"), ERROR_EXCERPT_CHARS),
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
