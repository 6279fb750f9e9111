use serde_json::Value;
use std::sync::Arc;

use tracing::warn;

use crate::{
    parser::StructuredMedicalRecord,
    storage::{
        EntryId, LogEntry, LogStatus, LogStore, MemoryEntry, MemoryStore, QueryId, QueryStore,
    },
};

/// Identity of the request a pipeline run belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestScope {
    pub session_id: String,
    /// Id of the query record that every log entry hangs off.
    pub query_id: Option<String>,
    /// The patient's raw input, shown to the judge.
    pub user_input: String,
    /// Stage whose log entries are sent on behalf of the user.
    pub entry_stage: Option<String>,
}

impl RequestScope {
    pub fn new(session_id: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            query_id: None,
            user_input: user_input.into(),
            entry_stage: None,
        }
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    pub fn with_entry_stage(mut self, stage_id: impl Into<String>) -> Self {
        self.entry_stage = Some(stage_id.into());
        self
    }
}

/// Writes to the log, memory and query collaborators.
///
/// Write failures are reported on the diagnostic channel and swallowed; they
/// never change the outcome of a stage.
#[derive(Clone)]
pub struct Recorder {
    log: Arc<dyn LogStore>,
    memory: Arc<dyn MemoryStore>,
    queries: Arc<dyn QueryStore>,
}

impl Recorder {
    pub fn new(
        log: Arc<dyn LogStore>,
        memory: Arc<dyn MemoryStore>,
        queries: Arc<dyn QueryStore>,
    ) -> Self {
        Self {
            log,
            memory,
            queries,
        }
    }

    pub async fn open_query(&self, session_id: &str, input_text: &str) -> Option<QueryId> {
        match self.queries.open(session_id, input_text).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(session_id, error = %e, "Failed to open query record");
                None
            }
        }
    }

    pub async fn close_query(&self, id: Option<QueryId>, response_text: &str, status: LogStatus) {
        let Some(id) = id else { return };
        if let Err(e) = self.queries.close(id, response_text, status).await {
            warn!(query_id = id, error = %e, "Failed to close query record");
        }
    }

    pub async fn store_record(
        &self,
        id: Option<QueryId>,
        scope: &RequestScope,
        record: &StructuredMedicalRecord,
        parsed_content: &Value,
    ) {
        let Some(id) = id else { return };
        if let Err(e) = self
            .queries
            .store_record(id, &scope.session_id, record, parsed_content)
            .await
        {
            warn!(query_id = id, error = %e, "Failed to store structured medical record");
        }
    }

    pub async fn append(
        &self,
        scope: &RequestScope,
        sender: &str,
        receiver: &str,
        input: &str,
        output: Option<&str>,
        status: LogStatus,
    ) -> Option<EntryId> {
        let entry = LogEntry {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            input: input.to_string(),
            output: output.map(str::to_string),
            status,
            session_id: scope.session_id.clone(),
            parent_query_id: scope.query_id.clone(),
        };
        match self.log.append(entry).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(sender, receiver, error = %e, "Failed to write communication log entry");
                None
            }
        }
    }

    pub async fn settle(&self, id: Option<EntryId>, output: &str, status: LogStatus) {
        let Some(id) = id else { return };
        if let Err(e) = self.log.update(id, output, status).await {
            warn!(entry_id = id, error = %e, "Failed to update communication log entry");
        }
    }

    pub async fn remember(&self, scope: &RequestScope, kind: &str, agent: &str, value: &str) {
        let entry = MemoryEntry {
            session_id: scope.session_id.clone(),
            kind: kind.to_string(),
            agent: agent.to_string(),
            value: value.to_string(),
        };
        if let Err(e) = self.memory.save(entry).await {
            warn!(kind, agent, error = %e, "Failed to save memory entry");
        }
    }
}
