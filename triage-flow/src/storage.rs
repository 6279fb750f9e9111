use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    conversation::{ConversationContext, ConversationTurn},
    error::{Result, TriageError},
    parser::StructuredMedicalRecord,
};

pub type EntryId = i64;
pub type QueryId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Completed,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Completed => "completed",
            LogStatus::Failed => "failed",
        }
    }
}

/// A communication record between two pipeline participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sender: String,
    pub receiver: String,
    pub input: String,
    pub output: Option<String>,
    pub status: LogStatus,
    pub session_id: String,
    pub parent_query_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLogEntry {
    pub id: EntryId,
    #[serde(flatten)]
    pub entry: LogEntry,
    pub created_at: DateTime<Utc>,
}

/// Append-only communication log.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, entry: LogEntry) -> Result<EntryId>;
    async fn update(&self, id: EntryId, output: &str, status: LogStatus) -> Result<()>;
}

/// In-memory implementation of LogStore
pub struct InMemoryLogStore {
    entries: Arc<DashMap<EntryId, StoredLogEntry>>,
    next_id: AtomicI64,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> Vec<StoredLogEntry> {
        let mut entries: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.id);
        entries
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, entry: LogEntry) -> Result<EntryId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(
            id,
            StoredLogEntry {
                id,
                entry,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn update(&self, id: EntryId, output: &str, status: LogStatus) -> Result<()> {
        let mut stored = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| TriageError::Persistence(format!("log entry {id} not found")))?;
        stored.entry.output = Some(output.to_string());
        stored.entry.status = status;
        Ok(())
    }
}

/// An item kept in the short-lived conversational memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub session_id: String,
    pub kind: String,
    pub agent: String,
    pub value: String,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn save(&self, entry: MemoryEntry) -> Result<()>;
    async fn search(&self, session_id: &str, kind: Option<&str>) -> Result<Vec<MemoryEntry>>;
}

/// In-memory implementation of MemoryStore
pub struct InMemoryMemoryStore {
    sessions: Arc<DashMap<String, Vec<MemoryEntry>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn save(&self, entry: MemoryEntry) -> Result<()> {
        self.sessions
            .entry(entry.session_id.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn search(&self, session_id: &str, kind: Option<&str>) -> Result<Vec<MemoryEntry>> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| kind.is_none_or(|k| e.kind == k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// One patient query and the response it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: QueryId,
    pub session_id: String,
    pub input_text: String,
    pub response_text: Option<String>,
    pub status: LogStatus,
    pub structured: Option<StructuredMedicalRecord>,
    /// Every field the parser extracted, including ones the record drops.
    pub parsed_content: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-request records that log entries point at through `parent_query_id`.
#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn open(&self, session_id: &str, input_text: &str) -> Result<QueryId>;
    async fn close(&self, id: QueryId, response_text: &str, status: LogStatus) -> Result<()>;
    async fn store_record(
        &self,
        id: QueryId,
        session_id: &str,
        record: &StructuredMedicalRecord,
        parsed_content: &Value,
    ) -> Result<()>;
}

pub struct InMemoryQueryStore {
    records: Arc<DashMap<QueryId, QueryRecord>>,
    next_id: AtomicI64,
}

impl InMemoryQueryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn get(&self, id: QueryId) -> Option<QueryRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    pub fn records(&self) -> Vec<QueryRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    fn record_mut(
        &self,
        id: QueryId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, QueryId, QueryRecord>> {
        self.records
            .get_mut(&id)
            .ok_or_else(|| TriageError::Persistence(format!("query record {id} not found")))
    }
}

impl Default for InMemoryQueryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryStore for InMemoryQueryStore {
    async fn open(&self, session_id: &str, input_text: &str) -> Result<QueryId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        self.records.insert(
            id,
            QueryRecord {
                id,
                session_id: session_id.to_string(),
                input_text: input_text.to_string(),
                response_text: None,
                status: LogStatus::Pending,
                structured: None,
                parsed_content: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn close(&self, id: QueryId, response_text: &str, status: LogStatus) -> Result<()> {
        let mut record = self.record_mut(id)?;
        record.response_text = Some(response_text.to_string());
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn store_record(
        &self,
        id: QueryId,
        session_id: &str,
        record: &StructuredMedicalRecord,
        parsed_content: &Value,
    ) -> Result<()> {
        let mut stored = self.record_mut(id)?;
        if stored.session_id != session_id {
            return Err(TriageError::Persistence(format!(
                "query record {id} belongs to another session"
            )));
        }
        stored.structured = Some(record.clone());
        stored.parsed_content = Some(parsed_content.clone());
        Ok(())
    }
}

/// Per-session state kept between requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub id: String,
    pub messages: Vec<ConversationTurn>,
    pub context: ConversationContext,
    pub created_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            context: ConversationContext::default(),
            created_at: Utc::now(),
        }
    }
}

/// Session map with one async lock per session id.
///
/// A request holds the session's guard for its whole read-modify-write, so
/// concurrent requests on the same id run one after another while different
/// ids never contend.
pub struct SessionStore {
    sessions: Arc<DashMap<String, Arc<Mutex<SessionData>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Lock the session, creating an empty one on first use.
    ///
    /// A guard is only handed out for the slot currently mapped to `id`. If
    /// the session was deleted while this call waited, it starts over on a
    /// fresh session.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<SessionData> {
        loop {
            let slot = self
                .sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SessionData::new(id))))
                .clone();
            let guard = slot.clone().lock_owned().await;
            let current = self
                .sessions
                .get(id)
                .is_some_and(|entry| Arc::ptr_eq(entry.value(), &slot));
            if current {
                return guard;
            }
        }
    }

    /// Snapshot of the session, waiting for any in-flight request on it.
    pub async fn get(&self, id: &str) -> Option<SessionData> {
        let slot = self.sessions.get(id).map(|entry| entry.clone())?;
        let data = slot.lock().await;
        Some(data.clone())
    }

    /// Remove the session once any in-flight request on it has finished.
    pub async fn delete(&self, id: &str) -> bool {
        let Some(slot) = self.sessions.get(id).map(|entry| entry.value().clone()) else {
            return false;
        };
        let _guard = slot.lock().await;
        self.sessions
            .remove_if(id, |_, current| Arc::ptr_eq(current, &slot))
            .is_some()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
