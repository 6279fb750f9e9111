use serde::{Deserialize, Serialize};
use serde_json::Value;

use triage_flow::{ConversationContext, ConversationTurn, StageReport};

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Replaces the stored session history for this request when present.
    #[serde(default)]
    pub conversation_history: Option<Vec<ConversationTurn>>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub timestamp: String,
    pub parsed_content: Value,
    pub diagnostics: Vec<StageReport>,
}

#[derive(Debug, Serialize)]
pub struct ChatFailure {
    pub error: String,
    pub session_id: String,
    pub diagnostics: Vec<StageReport>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub messages: Vec<ConversationTurn>,
    pub context: ConversationContext,
    pub created_at: String,
}
