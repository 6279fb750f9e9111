pub mod catalog;
pub mod clarification;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod executor;
pub mod judge;
pub mod mock;
pub mod parser;
pub mod pipeline;
pub mod recorder;
pub mod retry;
pub mod stage;
pub mod storage;
#[cfg(feature = "postgres")]
pub mod storage_postgres;

// Re-export commonly used types
pub use catalog::StageCatalog;
pub use clarification::{ClarificationCoordinator, ClarificationExchange, Predecessor};
pub use conversation::{ConversationContext, ConversationTurn, Role, format_conversation};
pub use engine::{Enricher, NoEnrichment, ReasoningEngine};
pub use error::{Result, StageFailure, TransportError, TriageError};
pub use executor::StageExecutor;
pub use judge::{ValidationGate, ValidationVerdict};
pub use parser::{ParsedResponse, ResponseType, StructuredMedicalRecord, parse_response, parse_text};
pub use pipeline::{
    Pipeline, PipelineBuilder, PipelineConfig, PipelineOutcome, PipelineRequest, StageReport,
    StageStatus,
};
pub use recorder::{Recorder, RequestScope};
pub use retry::{MAX_RETRIES, RetryController, RetryOutcome};
pub use stage::{StageInputs, StageSpec};
pub use storage::{
    InMemoryLogStore, InMemoryMemoryStore, InMemoryQueryStore, LogEntry, LogStatus, LogStore,
    MemoryEntry, MemoryStore, QueryId, QueryRecord, QueryStore, SessionData, SessionStore,
};
#[cfg(feature = "postgres")]
pub use storage_postgres::{PostgresLogStore, PostgresQueryStore};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedEngine;
    use std::sync::Arc;

    const OK: &str = r#"{"status":"ok"}"#;

    #[tokio::test]
    async fn test_simple_pipeline_execution() {
        let engine = Arc::new(ScriptedEngine::new());
        engine.push_texts([
            r#"{"symptoms": ["headache"], "duration": "2 days"}"#,
            OK,
            "tension-type pattern",
            OK,
            "tension headache",
            OK,
            "rest and fluids",
            OK,
            r#"Please rest. {"symptoms": ["headache"], "severity": "mild"}"#,
        ]);

        let pipeline = Pipeline::builder(engine.clone()).build();
        let outcome = pipeline
            .run(PipelineRequest::new("I have a headache", Vec::new()))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.diagnostics.len(), 5);
        let record = outcome.record.unwrap();
        assert_eq!(record.response_type(), ResponseType::Structured);
        assert_eq!(record.to_record().severity, "mild");
        assert_eq!(engine.remaining(), 0);
    }
}
