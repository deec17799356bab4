//! Streaming Orchestrator: runs the stages for one client and reports
//! progress as named events.
//!
//! State machine:
//!   started → parsed → gap_analyzed → planned → customized → persisted → completed
//! with `failed` reachable from any non-terminal state. The client is checked
//! for disconnection before every stage; a closed channel ends the run quietly.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::pipeline::{AnalysisPipeline, ErrorKind, Stage, StageOutput};
use crate::models::analysis::FullAnalysisResult;
use crate::store::AnalysisStore;

/// Capacity of the per-run event channel.
pub const EVENT_BUFFER: usize = 32;

/// One event on the wire. `name()` is the SSE event name; the variant fields
/// are the JSON data.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Run {
        run_id: String,
        status: &'static str,
    },
    LlmOutput {
        run_id: String,
        stage: Stage,
        content: String,
    },
    ReasoningOutput {
        run_id: String,
        stage: Stage,
        content: String,
    },
    Result {
        run_id: String,
        analysis_id: Uuid,
        result: Box<FullAnalysisResult>,
    },
    Complete {
        run_id: String,
        analysis_id: Uuid,
    },
    Error {
        run_id: String,
        kind: ErrorKind,
        message: String,
    },
}

impl StreamEvent {
    pub fn run(run_id: &str) -> Self {
        StreamEvent::Run {
            run_id: run_id.to_string(),
            status: "started",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Run { .. } => "run",
            StreamEvent::LlmOutput { .. } => "llm_output",
            StreamEvent::ReasoningOutput { .. } => "reasoning_output",
            StreamEvent::Result { .. } => "result",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Started,
    Parsed,
    GapAnalyzed,
    Planned,
    Customized,
    Persisted,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { analysis_id: Uuid },
    Failed { kind: ErrorKind },
    /// The client went away; `state` is the last state reached.
    Disconnected { state: RunState },
}

enum Halt {
    Failed(ErrorKind),
    Disconnected,
}

pub struct StreamingOrchestrator {
    pipeline: AnalysisPipeline,
    store: Arc<dyn AnalysisStore>,
    run_id: String,
    resume_text: String,
    jd_text: String,
}

impl StreamingOrchestrator {
    pub fn new(
        pipeline: AnalysisPipeline,
        store: Arc<dyn AnalysisStore>,
        run_id: String,
        resume_text: String,
        jd_text: String,
    ) -> Self {
        Self {
            pipeline,
            store,
            run_id,
            resume_text,
            jd_text,
        }
    }

    /// Drives the run to a terminal state, sending events into `tx`.
    pub async fn run(self, tx: mpsc::Sender<StreamEvent>) -> RunOutcome {
        let mut state = RunState::Started;
        info!("[run {}] started (model: {})", self.run_id, self.pipeline.model());

        match self.drive(&tx, &mut state).await {
            Ok(analysis_id) => {
                info!("[run {}] completed: analysis {analysis_id}", self.run_id);
                RunOutcome::Completed { analysis_id }
            }
            Err(Halt::Failed(kind)) => RunOutcome::Failed { kind },
            Err(Halt::Disconnected) => {
                info!("[run {}] client disconnected in state {state:?}", self.run_id);
                RunOutcome::Disconnected { state }
            }
        }
    }

    async fn drive(
        &self,
        tx: &mpsc::Sender<StreamEvent>,
        state: &mut RunState,
    ) -> Result<Uuid, Halt> {
        self.emit(tx, StreamEvent::run(&self.run_id)).await?;

        ensure_connected(tx)?;
        let parsed = self
            .pipeline
            .extract_profiles(&self.resume_text, &self.jd_text, true)
            .await;
        let parsed = self.check(tx, state, Stage::ParseProfile, parsed).await?;
        self.emit_stage_output(tx, Stage::ParseProfile, &parsed).await?;
        self.advance(state, RunState::Parsed);
        let (resume_profile, job_profile) = parsed.value;

        ensure_connected(tx)?;
        let gaps = self
            .pipeline
            .analyze_gaps(&resume_profile, &job_profile, true)
            .await;
        let gaps = self.check(tx, state, Stage::GapAnalysis, gaps).await?;
        self.emit_stage_output(tx, Stage::GapAnalysis, &gaps).await?;
        self.advance(state, RunState::GapAnalyzed);
        let (gap_analysis, jd_mapping_matrix) = gaps.value;

        ensure_connected(tx)?;
        let plan = self.pipeline.plan_learning(&gap_analysis, true).await;
        let plan = self.check(tx, state, Stage::LearningPlan, plan).await?;
        self.emit_stage_output(tx, Stage::LearningPlan, &plan).await?;
        self.advance(state, RunState::Planned);

        ensure_connected(tx)?;
        let resume = self
            .pipeline
            .customize_resume(&self.resume_text, &self.jd_text, true)
            .await;
        let resume = self.check(tx, state, Stage::CustomResume, resume).await?;
        self.emit_stage_output(tx, Stage::CustomResume, &resume).await?;
        self.advance(state, RunState::Customized);

        let result = FullAnalysisResult {
            resume_profile,
            job_profile,
            gap_analysis,
            jd_mapping_matrix,
            learning_plan: plan.value,
            custom_resume_markdown: resume.value,
        };

        let analysis_id = match self
            .store
            .save_analysis(&self.resume_text, &self.jd_text, &result)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                *state = RunState::Failed;
                warn!("[run {}] failed to persist analysis: {e}", self.run_id);
                return Err(self
                    .fail(tx, ErrorKind::Persistence, format!("Failed to save analysis: {e}"))
                    .await);
            }
        };
        self.advance(state, RunState::Persisted);

        self.emit(
            tx,
            StreamEvent::Result {
                run_id: self.run_id.clone(),
                analysis_id,
                result: Box::new(result),
            },
        )
        .await?;
        self.emit(
            tx,
            StreamEvent::Complete {
                run_id: self.run_id.clone(),
                analysis_id,
            },
        )
        .await?;
        self.advance(state, RunState::Completed);

        Ok(analysis_id)
    }

    /// Turns a stage error into one `error` event and a failed halt.
    async fn check<T>(
        &self,
        tx: &mpsc::Sender<StreamEvent>,
        state: &mut RunState,
        stage: Stage,
        result: Result<T, crate::analysis::pipeline::PipelineError>,
    ) -> Result<T, Halt> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("[run {}] stage {stage} failed in state {state:?}: {e}", self.run_id);
                *state = RunState::Failed;
                Err(self.fail(tx, e.kind(), e.to_string()).await)
            }
        }
    }

    async fn fail(&self, tx: &mpsc::Sender<StreamEvent>, kind: ErrorKind, message: String) -> Halt {
        let event = StreamEvent::Error {
            run_id: self.run_id.clone(),
            kind,
            message,
        };
        // The run is over either way; a gone client only changes the outcome.
        match tx.send(event).await {
            Ok(()) => Halt::Failed(kind),
            Err(_) => Halt::Disconnected,
        }
    }

    async fn emit_stage_output<T>(
        &self,
        tx: &mpsc::Sender<StreamEvent>,
        stage: Stage,
        output: &StageOutput<T>,
    ) -> Result<(), Halt> {
        if let Some(raw) = output.raw.as_deref().filter(|raw| !raw.is_empty()) {
            self.emit(
                tx,
                StreamEvent::LlmOutput {
                    run_id: self.run_id.clone(),
                    stage,
                    content: raw.to_string(),
                },
            )
            .await?;
        }

        if self.pipeline.reasoning_mode() {
            if let Some(reasoning) = output.reasoning.as_deref().filter(|r| !r.is_empty()) {
                self.emit(
                    tx,
                    StreamEvent::ReasoningOutput {
                        run_id: self.run_id.clone(),
                        stage,
                        content: reasoning.to_string(),
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn emit(&self, tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), Halt> {
        tx.send(event).await.map_err(|_| Halt::Disconnected)
    }

    fn advance(&self, state: &mut RunState, next: RunState) {
        info!("[run {}] {state:?} -> {next:?}", self.run_id);
        *state = next;
    }
}

fn ensure_connected(tx: &mpsc::Sender<StreamEvent>) -> Result<(), Halt> {
    if tx.is_closed() {
        Err(Halt::Disconnected)
    } else {
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::analysis::pipeline::tests::{
        gap_response, parse_response, plan_response, profile_json, resume_response,
        ScriptedProvider,
    };
    use crate::llm_client::{
        Completion, CompletionProvider, CompletionRequest, LlmError, LlmOverrides,
    };
    use crate::models::record::AnalysisSummary;
    use crate::store::{MemoryAnalysisStore, StoreError};

    fn happy_script() -> Vec<String> {
        vec![
            parse_response(),
            gap_response(),
            plan_response(),
            resume_response("# Tailored"),
        ]
    }

    fn orchestrator(
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn AnalysisStore>,
    ) -> StreamingOrchestrator {
        StreamingOrchestrator::new(
            AnalysisPipeline::new(provider, LlmOverrides::default()),
            store,
            "run-1".to_string(),
            "resume text".to_string(),
            "jd text".to_string(),
        )
    }

    async fn run_to_end(orch: StreamingOrchestrator) -> (RunOutcome, Vec<StreamEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = orch.run(tx).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::name).collect()
    }

    #[tokio::test]
    async fn test_happy_path_event_order() {
        let provider = Arc::new(ScriptedProvider::texts(&happy_script()));
        let store = Arc::new(MemoryAnalysisStore::new());
        let (outcome, events) = run_to_end(orchestrator(provider, store.clone())).await;

        assert_eq!(
            names(&events),
            vec![
                "run",
                "llm_output",
                "llm_output",
                "llm_output",
                "llm_output",
                "result",
                "complete"
            ]
        );
        let stages: Vec<Stage> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::LlmOutput { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                Stage::ParseProfile,
                Stage::GapAnalysis,
                Stage::LearningPlan,
                Stage::CustomResume
            ]
        );

        let RunOutcome::Completed { analysis_id } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        match &events[6] {
            StreamEvent::Complete {
                analysis_id: id, ..
            } => assert_eq!(*id, analysis_id),
            other => panic!("unexpected event {other:?}"),
        }
        let saved = store.load_analysis(analysis_id).await.unwrap().unwrap();
        assert_eq!(saved.custom_resume_markdown, "# Tailored");
    }

    #[tokio::test]
    async fn test_result_event_matches_stage_outputs() {
        let provider = Arc::new(ScriptedProvider::texts(&happy_script()));
        let store = Arc::new(MemoryAnalysisStore::new());
        let (_, events) = run_to_end(orchestrator(provider, store)).await;

        let result = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::Result { result, .. } => Some(result.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(result.resume_profile.title, "r");
        assert_eq!(result.gap_analysis.gaps[0].id, "gap1");
        assert_eq!(result.learning_plan.phases.len(), 1);
    }

    #[tokio::test]
    async fn test_event_payload_shape() {
        let event = StreamEvent::LlmOutput {
            run_id: "abc".to_string(),
            stage: Stage::GapAnalysis,
            content: "{}".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"run_id": "abc", "stage": "gap_analysis", "content": "{}"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::run("abc")).unwrap(),
            json!({"run_id": "abc", "status": "started"})
        );
    }

    #[tokio::test]
    async fn test_invalid_stage_one_halts_with_validation_error() {
        let body = json!({"resume_profile": profile_json("resume", "r")}).to_string();
        let provider = Arc::new(ScriptedProvider::texts(&[body, gap_response()]));
        let store = Arc::new(MemoryAnalysisStore::new());
        let (outcome, events) =
            run_to_end(orchestrator(provider.clone(), store.clone())).await;

        assert_eq!(
            outcome,
            RunOutcome::Failed {
                kind: ErrorKind::Validation
            }
        );
        assert_eq!(names(&events), vec!["run", "error"]);
        assert_eq!(provider.calls(), 1);
        assert_eq!(store.analysis_count().await, 0);
    }

    #[tokio::test]
    async fn test_reasoning_emitted_for_reasoner_models() {
        let responses = happy_script()
            .into_iter()
            .map(|text| {
                Ok(Completion {
                    text,
                    reasoning: Some("thinking".to_string()),
                })
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::with_model(responses, "deepseek-reasoner"));
        let store = Arc::new(MemoryAnalysisStore::new());
        let (_, events) = run_to_end(orchestrator(provider, store)).await;

        let reasoning = names(&events)
            .into_iter()
            .filter(|n| *n == "reasoning_output")
            .count();
        assert_eq!(reasoning, 4);
        assert_eq!(events[1].name(), "llm_output");
        assert_eq!(events[2].name(), "reasoning_output");
    }

    #[tokio::test]
    async fn test_reasoning_suppressed_for_chat_models() {
        let responses = happy_script()
            .into_iter()
            .map(|text| {
                Ok(Completion {
                    text,
                    reasoning: Some("thinking".to_string()),
                })
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(responses));
        let store = Arc::new(MemoryAnalysisStore::new());
        let (_, events) = run_to_end(orchestrator(provider, store)).await;
        assert!(!names(&events).contains(&"reasoning_output"));
    }

    #[tokio::test]
    async fn test_provider_error_reports_kind() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(LlmError::Config(
            "No API key configured".to_string(),
        ))]));
        let store = Arc::new(MemoryAnalysisStore::new());
        let (outcome, events) = run_to_end(orchestrator(provider, store)).await;

        assert_eq!(
            outcome,
            RunOutcome::Failed {
                kind: ErrorKind::Configuration
            }
        );
        match events.last() {
            Some(StreamEvent::Error { kind, run_id, .. }) => {
                assert_eq!(*kind, ErrorKind::Configuration);
                assert_eq!(run_id, "run-1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    struct FailingStore;

    #[async_trait]
    impl AnalysisStore for FailingStore {
        async fn save_analysis(
            &self,
            _: &str,
            _: &str,
            _: &FullAnalysisResult,
        ) -> Result<Uuid, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn load_analysis(&self, _: Uuid) -> Result<Option<FullAnalysisResult>, StoreError> {
            Ok(None)
        }
        async fn list_analyses(&self, _: usize) -> Result<Vec<AnalysisSummary>, StoreError> {
            Ok(Vec::new())
        }
        async fn save_draft(&self, _: Uuid, _: &FullAnalysisResult) -> Result<(), StoreError> {
            Ok(())
        }
        async fn load_draft(&self, _: Uuid) -> Result<Option<FullAnalysisResult>, StoreError> {
            Ok(None)
        }
        async fn draft_history(&self, _: Uuid) -> Result<Vec<FullAnalysisResult>, StoreError> {
            Ok(Vec::new())
        }
        async fn clear_draft(&self, _: Uuid) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_persistence_error() {
        let provider = Arc::new(ScriptedProvider::texts(&happy_script()));
        let (outcome, events) = run_to_end(orchestrator(provider, Arc::new(FailingStore))).await;

        assert_eq!(
            outcome,
            RunOutcome::Failed {
                kind: ErrorKind::Persistence
            }
        );
        let last = events.last().unwrap();
        assert_eq!(last.name(), "error");
        assert!(!names(&events).contains(&"result"));
    }

    /// Blocks the call with index `gate_call` until released.
    struct GatedProvider {
        inner: ScriptedProvider,
        gate: Arc<Notify>,
        gate_call: usize,
    }

    #[async_trait]
    impl CompletionProvider for GatedProvider {
        async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, LlmError> {
            if self.inner.calls() == self.gate_call {
                self.gate.notified().await;
            }
            self.inner.complete(request).await
        }

        fn default_model(&self) -> &str {
            self.inner.default_model()
        }
    }

    #[tokio::test]
    async fn test_disconnect_stops_run_without_persisting() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(GatedProvider {
            inner: ScriptedProvider::texts(&happy_script()),
            gate: gate.clone(),
            gate_call: 2,
        });
        let store = Arc::new(MemoryAnalysisStore::new());
        let (tx, mut rx) = mpsc::channel(64);
        let handle = tokio::spawn(orchestrator(provider.clone(), store.clone()).run(tx));

        while let Some(event) = rx.recv().await {
            if matches!(
                event,
                StreamEvent::LlmOutput {
                    stage: Stage::GapAnalysis,
                    ..
                }
            ) {
                break;
            }
        }
        drop(rx);
        gate.notify_one();

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, RunOutcome::Disconnected { .. }));
        assert!(provider.inner.calls() <= 3);
        assert_eq!(store.analysis_count().await, 0);
    }
}
