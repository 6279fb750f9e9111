use std::sync::Arc;

use async_trait::async_trait;
use triage_flow::mock::{ScriptedEngine, StaticEnricher};
use triage_flow::parser::StructuredMedicalRecord;
use triage_flow::storage::EntryId;
use triage_flow::{
    ConversationTurn, InMemoryLogStore, InMemoryMemoryStore, InMemoryQueryStore, LogEntry,
    LogStatus, LogStore, MemoryStore, Pipeline, PipelineConfig, PipelineRequest, QueryId,
    QueryStore, ResponseType, StageFailure, StageStatus, TriageError,
};

const OK: &str = r#"{"status":"ok"}"#;

struct Fixture {
    engine: Arc<ScriptedEngine>,
    enricher: Arc<StaticEnricher>,
    log: Arc<InMemoryLogStore>,
    memory: Arc<InMemoryMemoryStore>,
    queries: Arc<InMemoryQueryStore>,
    pipeline: Pipeline,
}

fn fixture_with(enricher: StaticEnricher) -> Fixture {
    let engine = Arc::new(ScriptedEngine::new());
    let enricher = Arc::new(enricher);
    let log = Arc::new(InMemoryLogStore::new());
    let memory = Arc::new(InMemoryMemoryStore::new());
    let queries = Arc::new(InMemoryQueryStore::new());
    let pipeline = Pipeline::builder(engine.clone())
        .enricher(enricher.clone())
        .log_store(log.clone())
        .memory_store(memory.clone())
        .query_store(queries.clone())
        .build();
    Fixture {
        engine,
        enricher,
        log,
        memory,
        queries,
        pipeline,
    }
}

fn fixture() -> Fixture {
    fixture_with(StaticEnricher::new("Headaches are commonly tension-type."))
}

fn request(input: &str) -> PipelineRequest {
    PipelineRequest::new(input, Vec::new()).with_session("session-1")
}

/// Stage output followed by an accepting verdict, for the four validated stages.
fn happy_path(engine: &ScriptedEngine) {
    engine.push_texts([
        r#"{"symptoms": ["headache", "fever"], "duration": "1 day"}"#,
        OK,
        "pattern suggests a viral infection",
        OK,
        "influenza-like illness",
        OK,
        "rest, fluids, paracetamol",
        OK,
    ]);
}

#[tokio::test]
async fn completes_and_extracts_structured_record() {
    let f = fixture();
    happy_path(&f.engine);
    f.engine.push_text(
        r#"You likely have a viral illness. {"symptoms":["cough"]} {"severity":"mild"}"#,
    );

    let outcome = f.pipeline.run(request("I have a headache and fever")).await;

    assert!(outcome.is_success());
    assert_eq!(f.engine.remaining(), 0);
    let record = outcome.record.expect("record");
    assert_eq!(record.response_type(), ResponseType::Structured);
    assert!(record.get("symptoms").is_some());
    assert!(record.get("severity").is_some());
    assert_eq!(record.raw_response(), outcome.final_text);

    let stages: Vec<_> = outcome.diagnostics.iter().map(|r| r.stage_id.as_str()).collect();
    assert_eq!(
        stages,
        vec![
            "information",
            "symptom_analysis",
            "diagnosis",
            "treatment",
            "communication"
        ]
    );
    assert!(
        outcome
            .diagnostics
            .iter()
            .all(|r| r.status == StageStatus::Completed && r.attempts == 1)
    );
}

#[tokio::test]
async fn every_attempt_is_logged_once() {
    let f = fixture();
    happy_path(&f.engine);
    f.engine.push_text("Take care.");

    let outcome = f.pipeline.run(request("I have a headache")).await;

    let query_id = outcome.query_id.expect("query record").to_string();
    let entries = f.log.entries();
    // Four validated stages write a stage and a verdict entry each, then the
    // communicator writes its call and the record hand-off.
    assert_eq!(entries.len(), 10);
    assert_eq!(entries[0].entry.sender, "user");
    assert_eq!(entries[0].entry.receiver, "Judge Agent");
    assert_eq!(entries[2].entry.sender, "Symptom Analyzer");
    assert!(
        entries
            .iter()
            .all(|e| e.entry.session_id == "session-1"
                && e.entry.parent_query_id.as_deref() == Some(query_id.as_str()))
    );
    let last = &entries[9].entry;
    assert_eq!(last.sender, "Communicator");
    assert_eq!(last.receiver, "database");
    assert_eq!(last.output.as_deref(), Some("Take care."));

    let memory = f.memory.search("session-1", None).await.unwrap();
    assert_eq!(memory.len(), 6);
    assert_eq!(memory[0].kind, "user_input_with_context");
    assert_eq!(memory[5].kind, "parsed_llm_response");
}

#[tokio::test]
async fn successful_run_settles_query_record_with_structured_data() {
    let f = fixture();
    happy_path(&f.engine);
    f.engine
        .push_text(r#"Rest and hydrate. {"symptoms": ["headache"], "severity": "mild"}"#);

    let outcome = f.pipeline.run(request("I have a headache")).await;

    let record = f.queries.get(outcome.query_id.unwrap()).unwrap();
    assert_eq!(record.session_id, "session-1");
    assert_eq!(record.input_text, "I have a headache");
    assert_eq!(record.status, LogStatus::Completed);
    assert_eq!(record.response_text.as_deref(), Some(outcome.final_text.as_str()));
    let structured = record.structured.unwrap();
    assert_eq!(structured.symptoms, vec!["headache"]);
    assert_eq!(structured.severity, "mild");
    assert_eq!(record.parsed_content.unwrap()["response_type"], "structured");
}

#[tokio::test]
async fn failed_run_marks_query_record_failed() {
    let f = fixture();
    f.engine.push_error("model unavailable");

    let outcome = f.pipeline.run(request("I have a headache")).await;

    let records = f.queries.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, LogStatus::Failed);
    assert_eq!(records[0].response_text.as_deref(), Some(outcome.final_text.as_str()));
    assert!(records[0].structured.is_none());
    assert_eq!(
        f.log.entries()[0].entry.parent_query_id,
        Some(records[0].id.to_string())
    );
}

#[tokio::test]
async fn rejection_then_acceptance_retries_with_corrections() {
    let f = fixture();
    f.engine.push_texts([
        "vague extraction",
        r#"{"error": "too vague", "suggested_corrections": "ask duration"}"#,
        "extraction with duration",
        r#"{"status":"ok"}"#,
        "analysis",
        OK,
        "diagnosis",
        OK,
        "treatment",
        OK,
        "final words",
    ]);

    let outcome = f.pipeline.run(request("I have a headache")).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.diagnostics[0].attempts, 2);
    let prompts = f.engine.prompts();
    assert!(prompts[2].ends_with("\nApply the following corrections: ask duration"));
    // The accepted extraction, not the rejected one, feeds the next stage.
    assert!(prompts[4].contains("extraction with duration"));
    assert!(!prompts[4].contains("vague extraction"));
}

#[tokio::test]
async fn clarification_hop_reruns_predecessor_once() {
    let f = fixture();
    f.engine.push_texts([
        "extracted: headache",
        OK,
        "We need more details. Clarification request: please specify onset",
        OK,
        "extracted: headache since yesterday morning",
        OK,
        "analysis: acute onset headache",
        OK,
        "diagnosis",
        OK,
        "treatment",
        OK,
        "final words",
    ]);

    let outcome = f.pipeline.run(request("I have a headache")).await;

    assert!(outcome.is_success(), "{}", outcome.final_text);
    assert_eq!(f.engine.remaining(), 0);

    let symptom_report = &outcome.diagnostics[1];
    assert!(symptom_report.clarified);
    assert_eq!(symptom_report.attempts, 2);
    assert_eq!(symptom_report.predecessor_attempts, 1);

    let prompts = f.engine.prompts();
    assert!(prompts[4].contains(
        "Address this clarification request: We need more details. Clarification request: please specify onset"
    ));
    assert!(prompts[6].contains(
        "Use this clarification response: extracted: headache since yesterday morning"
    ));
    // Diagnosis sees the second analysis.
    assert!(prompts[8].contains("analysis: acute onset headache"));

    let hops = f
        .log
        .entries()
        .into_iter()
        .filter(|e| e.entry.sender == "Symptom Analyzer" && e.entry.receiver == "Information Agent")
        .count();
    assert_eq!(hops, 1);
    let requests = f
        .memory
        .search("session-1", Some("clarification_request"))
        .await
        .unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn max_retries_short_circuits_remaining_stages() {
    let f = fixture();
    f.engine.push_texts(["extraction", OK]);
    for i in 0..3 {
        f.engine.push_text(format!("analysis {i}"));
        f.engine.push_text(r#"{"error": "unsafe", "suggested_corrections": "be careful"}"#);
    }

    let outcome = f.pipeline.run(request("I have a headache")).await;

    assert!(!outcome.is_success());
    assert!(outcome.final_text.starts_with("Error"));
    assert!(outcome.record.is_none());
    assert_eq!(
        outcome.failure,
        Some(StageFailure::MaxRetriesExceeded {
            stage: "Symptom Analyzer".into(),
            message: "unsafe".into(),
        })
    );
    assert_eq!(outcome.diagnostics.len(), 2);
    assert_eq!(outcome.diagnostics[1].attempts, 3);
    assert_eq!(outcome.diagnostics[1].error_kind, Some("max_retries_exceeded"));
    assert_eq!(f.engine.call_count(), 8);
}

#[tokio::test]
async fn unparseable_verdict_stops_the_pipeline() {
    let f = fixture();
    f.engine.push_texts(["extraction", "I think it is fine"]);

    let outcome = f.pipeline.run(request("I have a headache")).await;

    assert_eq!(
        outcome.final_text,
        "Error parsing validation result for Information Agent"
    );
    assert_eq!(f.engine.call_count(), 2);
}

#[tokio::test]
async fn enrichment_failure_runs_no_stage() {
    let f = fixture_with(StaticEnricher::failing("chunk api unreachable"));

    let outcome = f.pipeline.run(request("I have a headache")).await;

    assert_eq!(
        outcome.final_text,
        "Error in Enrichment: chunk api unreachable"
    );
    assert!(outcome.diagnostics.is_empty());
    assert_eq!(f.engine.call_count(), 0);
}

#[tokio::test]
async fn communicator_failure_is_reported() {
    let f = fixture();
    happy_path(&f.engine);
    f.engine.push_error("model crashed");

    let outcome = f.pipeline.run(request("I have a headache")).await;

    assert_eq!(outcome.final_text, "Error in Communicator: model crashed");
    let last = outcome.diagnostics.last().unwrap();
    assert_eq!(last.stage_id, "communication");
    assert_eq!(last.status, StageStatus::Failed);
}

#[tokio::test]
async fn enrichment_and_history_reach_the_first_stage() {
    let f = fixture();
    happy_path(&f.engine);
    f.engine.push_text("done");
    let history = vec![
        ConversationTurn::patient("I get a sharp pain behind my eyes"),
        ConversationTurn::assistant("That could be a tension condition."),
    ];

    let outcome = f
        .pipeline
        .run(PipelineRequest::new("It is back today", history))
        .await;

    let enrich_calls = f.enricher.calls();
    assert_eq!(enrich_calls.len(), 1);
    assert!(enrich_calls[0].starts_with("Previous conversation:\n1. Patient: I get a sharp pain"));
    assert!(enrich_calls[0].ends_with("Current user input: It is back today"));

    let first_prompt = &f.engine.prompts()[0];
    assert!(first_prompt.contains("Headaches are commonly tension-type."));
    assert!(first_prompt.contains("2. Dr. AI: That could be a tension condition."));
    assert!(first_prompt.contains("\"previous_symptoms\":[\"I get a sharp pain behind my eyes\"]"));

    assert_eq!(
        outcome.context.previous_diagnoses,
        vec!["That could be a tension condition."]
    );
    assert_eq!(outcome.context.current_input, "It is back today");
}

struct BrokenLogStore;

#[async_trait]
impl LogStore for BrokenLogStore {
    async fn append(&self, _entry: LogEntry) -> triage_flow::Result<EntryId> {
        Err(TriageError::Persistence("database is down".into()))
    }

    async fn update(&self, _id: EntryId, _output: &str, _status: LogStatus) -> triage_flow::Result<()> {
        Err(TriageError::Persistence("database is down".into()))
    }
}

struct BrokenMemoryStore;

#[async_trait]
impl MemoryStore for BrokenMemoryStore {
    async fn save(&self, _entry: triage_flow::MemoryEntry) -> triage_flow::Result<()> {
        Err(TriageError::Storage("redis is down".into()))
    }

    async fn search(
        &self,
        _session_id: &str,
        _kind: Option<&str>,
    ) -> triage_flow::Result<Vec<triage_flow::MemoryEntry>> {
        Ok(Vec::new())
    }
}

struct BrokenQueryStore;

#[async_trait]
impl QueryStore for BrokenQueryStore {
    async fn open(&self, _session_id: &str, _input_text: &str) -> triage_flow::Result<QueryId> {
        Err(TriageError::Persistence("database is down".into()))
    }

    async fn close(
        &self,
        _id: QueryId,
        _response_text: &str,
        _status: LogStatus,
    ) -> triage_flow::Result<()> {
        Err(TriageError::Persistence("database is down".into()))
    }

    async fn store_record(
        &self,
        _id: QueryId,
        _session_id: &str,
        _record: &StructuredMedicalRecord,
        _parsed_content: &serde_json::Value,
    ) -> triage_flow::Result<()> {
        Err(TriageError::Persistence("database is down".into()))
    }
}

#[tokio::test]
async fn persistence_failures_never_abort() {
    let engine = Arc::new(ScriptedEngine::new());
    happy_path(&engine);
    engine.push_text("All done.");
    let pipeline = Pipeline::builder(engine.clone())
        .log_store(Arc::new(BrokenLogStore))
        .memory_store(Arc::new(BrokenMemoryStore))
        .query_store(Arc::new(BrokenQueryStore))
        .build();

    let outcome = pipeline.run(request("I have a headache")).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.final_text, "All done.");
    assert!(outcome.query_id.is_none());
}

#[tokio::test]
async fn custom_retry_bound_is_honoured() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_texts([
        "extraction",
        r#"{"error": "no"}"#,
    ]);
    let pipeline = Pipeline::builder(engine.clone())
        .config(PipelineConfig {
            max_retries: 1,
            ..PipelineConfig::default()
        })
        .build();

    let outcome = pipeline.run(request("hi")).await;

    assert_eq!(
        outcome.final_text,
        "Error: max retries reached for Information Agent: no"
    );
    assert_eq!(engine.call_count(), 2);
}
