use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::{
    catalog::{StageCatalog, input_keys, stage_ids},
    clarification::{ClarificationCoordinator, ClarifiedOutcome, DEFAULT_TRIGGER_PHRASE, Predecessor},
    conversation::{ConversationContext, ConversationTurn, format_conversation},
    engine::{Enricher, NoEnrichment, ReasoningEngine},
    error::StageFailure,
    executor::StageExecutor,
    judge::ValidationGate,
    parser::{ParsedResponse, parse_text},
    recorder::{Recorder, RequestScope},
    retry::{MAX_RETRIES, RetryController},
    stage::{StageInputs, StageSpec},
    storage::{
        InMemoryLogStore, InMemoryMemoryStore, InMemoryQueryStore, LogStatus, LogStore,
        MemoryStore, QueryId, QueryStore,
    },
};

/// Stage name used when the enrichment call fails before stage 1.
pub const ENRICHMENT_STAGE: &str = "Enrichment";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub max_retries: u32,
    /// Upper bound on a single reasoning-engine call.
    pub stage_timeout: Duration,
    /// Number of most recent turns included in the formatted conversation.
    pub history_window: usize,
    pub trigger_phrase: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            stage_timeout: Duration::from_secs(120),
            history_window: 10,
            trigger_phrase: DEFAULT_TRIGGER_PHRASE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub user_input: String,
    pub history: Vec<ConversationTurn>,
    pub session_id: String,
}

impl PipelineRequest {
    pub fn new(user_input: impl Into<String>, history: Vec<ConversationTurn>) -> Self {
        Self {
            user_input: user_input.into(),
            history,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
}

/// Per-stage diagnostics returned alongside the final text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage_id: String,
    pub stage: String,
    pub attempts: u32,
    pub predecessor_attempts: u32,
    pub clarified: bool,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageReport {
    fn new(spec: &StageSpec, outcome: &ClarifiedOutcome) -> Self {
        let failure = outcome.result.as_ref().err();
        Self {
            stage_id: spec.id.clone(),
            stage: spec.name.clone(),
            attempts: outcome.attempts,
            predecessor_attempts: outcome.predecessor_attempts,
            clarified: outcome.clarified,
            status: if failure.is_some() {
                StageStatus::Failed
            } else {
                StageStatus::Completed
            },
            error_kind: failure.map(StageFailure::kind),
            error: failure.map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Text for the patient; the failure message when a stage failed.
    pub final_text: String,
    /// Structured extraction of the final text. Absent on failure.
    pub record: Option<ParsedResponse>,
    pub context: ConversationContext,
    pub diagnostics: Vec<StageReport>,
    pub failure: Option<StageFailure>,
    /// Query record the run's log entries point at, when one could be opened.
    pub query_id: Option<QueryId>,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    fn failed(
        failure: StageFailure,
        context: ConversationContext,
        diagnostics: Vec<StageReport>,
        query_id: Option<QueryId>,
    ) -> Self {
        error!(stage = %failure.stage(), kind = failure.kind(), "Pipeline aborted");
        Self {
            final_text: failure.to_string(),
            record: None,
            context,
            diagnostics,
            failure: Some(failure),
            query_id,
        }
    }
}

/// Sequences the four validated stages and the final communication stage.
pub struct Pipeline {
    catalog: StageCatalog,
    executor: StageExecutor,
    retry: RetryController,
    clarification: ClarificationCoordinator,
    recorder: Recorder,
    enricher: Arc<dyn Enricher>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn builder(engine: Arc<dyn ReasoningEngine>) -> PipelineBuilder {
        PipelineBuilder::new(engine)
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one patient query through every stage.
    pub async fn run(&self, request: PipelineRequest) -> PipelineOutcome {
        let PipelineRequest {
            user_input,
            history,
            session_id,
        } = request;

        let context = ConversationContext::build(&history, &user_input);
        let conversation = format_conversation(&history, &user_input, self.config.history_window);
        let context_value = context.to_prompt_value();

        let query_id = self.recorder.open_query(&session_id, &user_input).await;
        let mut scope = RequestScope::new(session_id, user_input.as_str())
            .with_entry_stage(self.catalog.information.id.as_str());
        if let Some(id) = query_id {
            scope = scope.with_query_id(id.to_string());
        }

        info!(
            session_id = %scope.session_id,
            history_len = history.len(),
            "Starting triage pipeline"
        );

        let snapshot = json!({
            "user_input": user_input,
            "conversation_context": context,
            "formatted_conversation": conversation,
        });
        self.recorder
            .remember(&scope, "user_input_with_context", "user", &snapshot.to_string())
            .await;

        let passage = match self.enricher.enrich(&conversation).await {
            Ok(passage) => passage,
            Err(source) => {
                let failure = StageFailure::Transport {
                    stage: ENRICHMENT_STAGE.to_string(),
                    source,
                };
                return self.abort(failure, context, Vec::new(), query_id).await;
            }
        };

        let stages = [
            (
                &self.catalog.information,
                StageInputs::new()
                    .with(input_keys::USER_INPUT, conversation.as_str())
                    .with(input_keys::CHUNK_DATA, passage),
                None,
            ),
            (
                &self.catalog.symptom_analysis,
                StageInputs::new(),
                Some(input_keys::EXTRACTED_INFO),
            ),
            (
                &self.catalog.diagnosis,
                StageInputs::new(),
                Some(input_keys::SYMPTOM_ANALYSIS),
            ),
            (
                &self.catalog.treatment,
                StageInputs::new(),
                Some(input_keys::DIAGNOSES),
            ),
        ];

        let mut diagnostics = Vec::with_capacity(stages.len() + 1);
        let mut ran: Vec<(&StageSpec, StageInputs)> = Vec::with_capacity(stages.len());
        let mut previous_output = String::new();

        for (spec, mut inputs, upstream_key) in stages {
            if let Some(key) = upstream_key {
                inputs.set(key, previous_output.as_str());
            }
            inputs.set(input_keys::CONVERSATION_CONTEXT, context_value.as_str());

            let outcome = self.run_stage(spec, &inputs, &ran, &scope).await;
            diagnostics.push(StageReport::new(spec, &outcome));

            match outcome.result {
                Ok(output) => previous_output = output,
                Err(failure) => {
                    return self.abort(failure, context, diagnostics, query_id).await;
                }
            }
            ran.push((spec, inputs));
        }

        let history_value = serde_json::to_string(&history).unwrap_or_else(|_| "[]".to_string());
        let communication = &self.catalog.communication;
        let inputs = StageInputs::new()
            .with(input_keys::VALIDATED_OUTPUT, previous_output)
            .with(input_keys::CONVERSATION_CONTEXT, context_value)
            .with(input_keys::CONVERSATION_HISTORY, history_value);

        let attempt = self.executor.execute(communication, &inputs).await;
        let (log_output, log_status) = match &attempt {
            Ok(text) => (text.clone(), LogStatus::Completed),
            Err(failure) => (failure.to_string(), LogStatus::Failed),
        };
        self.recorder
            .append(
                &scope,
                &communication.name,
                "user",
                &inputs.to_string(),
                Some(&log_output),
                log_status,
            )
            .await;

        let report = ClarifiedOutcome {
            result: attempt,
            attempts: 1,
            predecessor_attempts: 0,
            clarified: false,
        };
        diagnostics.push(StageReport::new(communication, &report));

        let final_text = match report.result {
            Ok(text) => text,
            Err(failure) => return self.abort(failure, context, diagnostics, query_id).await,
        };

        let parsed = parse_text(&final_text);
        let parsed_value = parsed.clone().into_value();
        let parsed_json = parsed_value.to_string();
        self.recorder
            .remember(&scope, "parsed_llm_response", &communication.name, &parsed_json)
            .await;
        self.recorder
            .append(
                &scope,
                &communication.name,
                "database",
                &parsed_json,
                Some(&final_text),
                LogStatus::Completed,
            )
            .await;
        self.recorder
            .close_query(query_id, &final_text, LogStatus::Completed)
            .await;
        self.recorder
            .store_record(query_id, &scope, &parsed.to_record(), &parsed_value)
            .await;

        info!(
            session_id = %scope.session_id,
            response_type = parsed.response_type().as_str(),
            "Triage pipeline completed"
        );

        PipelineOutcome {
            final_text,
            record: Some(parsed),
            context,
            diagnostics,
            failure: None,
            query_id,
        }
    }

    async fn abort(
        &self,
        failure: StageFailure,
        context: ConversationContext,
        diagnostics: Vec<StageReport>,
        query_id: Option<QueryId>,
    ) -> PipelineOutcome {
        self.recorder
            .close_query(query_id, &failure.to_string(), LogStatus::Failed)
            .await;
        PipelineOutcome::failed(failure, context, diagnostics, query_id)
    }

    async fn run_stage(
        &self,
        spec: &StageSpec,
        inputs: &StageInputs,
        ran: &[(&StageSpec, StageInputs)],
        scope: &RequestScope,
    ) -> ClarifiedOutcome {
        if spec.predecessor.is_none() {
            let outcome = self.retry.run(spec, inputs, scope).await;
            return ClarifiedOutcome {
                result: outcome.result,
                attempts: outcome.attempts,
                predecessor_attempts: 0,
                clarified: false,
            };
        }

        let predecessor = self.catalog.predecessor_of(spec).and_then(|target| {
            ran.iter()
                .find(|(done, _)| done.id == target.id)
                .map(|(stage, inputs)| Predecessor {
                    stage: *stage,
                    inputs,
                })
        });
        self.clarification
            .run(spec, inputs, predecessor, scope)
            .await
    }
}

/// Builder for creating pipelines
pub struct PipelineBuilder {
    engine: Arc<dyn ReasoningEngine>,
    enricher: Arc<dyn Enricher>,
    log: Arc<dyn LogStore>,
    memory: Arc<dyn MemoryStore>,
    queries: Arc<dyn QueryStore>,
    catalog: StageCatalog,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn new(engine: Arc<dyn ReasoningEngine>) -> Self {
        Self {
            engine,
            enricher: Arc::new(NoEnrichment),
            log: Arc::new(InMemoryLogStore::new()),
            memory: Arc::new(InMemoryMemoryStore::new()),
            queries: Arc::new(InMemoryQueryStore::new()),
            catalog: StageCatalog::default(),
            config: PipelineConfig::default(),
        }
    }

    pub fn enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn log_store(mut self, log: Arc<dyn LogStore>) -> Self {
        self.log = log;
        self
    }

    pub fn memory_store(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn query_store(mut self, queries: Arc<dyn QueryStore>) -> Self {
        self.queries = queries;
        self
    }

    pub fn catalog(mut self, catalog: StageCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Pipeline {
        let executor = StageExecutor::new(self.engine, self.config.stage_timeout);
        let recorder = Recorder::new(self.log, self.memory, self.queries);
        let gate = ValidationGate::new(self.catalog.judge.clone(), executor.clone());
        let retry = RetryController::new(
            executor.clone(),
            gate,
            recorder.clone(),
            self.config.max_retries,
        );
        let clarification = ClarificationCoordinator::new(
            retry.clone(),
            recorder.clone(),
            self.config.trigger_phrase.as_str(),
        );

        info!(
            engine = executor.engine_name(),
            max_retries = retry.max_retries(),
            first_stage = stage_ids::INFORMATION,
            "Pipeline built"
        );

        Pipeline {
            catalog: self.catalog,
            executor,
            retry,
            clarification,
            recorder,
            enricher: self.enricher,
            config: self.config,
        }
    }
}
