use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking. Older clients send `user`.
    #[serde(alias = "user")]
    Patient,
    Assistant,
}

/// One message of a conversation. Turns are never edited after they are appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    /// Clients send free-form values here; anything that is not RFC 3339
    /// becomes the time the turn was received.
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(Utc::now))
}

impl ConversationTurn {
    pub fn patient(content: impl Into<String>) -> Self {
        Self {
            role: Role::Patient,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

const SYMPTOM_WORDS: &[&str] = &["pain", "ache", "hurt", "symptom", "feeling"];
const HISTORY_WORDS: &[&str] = &["history", "diagnosed", "condition", "disease"];
const MEDICATION_WORDS: &[&str] = &["medication", "medicine", "pill", "prescription"];
const ALLERGY_WORDS: &[&str] = &["allergy", "allergic", "reaction"];
const LIFESTYLE_WORDS: &[&str] = &["exercise", "diet", "smoking", "alcohol", "stress"];
const DIAGNOSIS_WORDS: &[&str] = &["diagnosis", "condition", "disease"];
const TREATMENT_WORDS: &[&str] = &["treatment", "medication", "therapy", "recommendation"];

/// Categorised view of what was said earlier in the conversation.
///
/// Built fresh for every request from the full turn history. Each list keeps
/// the original wording of the turns that matched, in conversation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub previous_symptoms: Vec<String>,
    pub previous_diagnoses: Vec<String>,
    pub previous_treatments: Vec<String>,
    pub patient_concerns: Vec<String>,
    pub medical_history: Vec<String>,
    pub current_medications: Vec<String>,
    pub allergies: Vec<String>,
    pub lifestyle_factors: Vec<String>,
    pub current_input: String,
}

impl ConversationContext {
    /// Derive the context bag from `history`. Pure and deterministic.
    ///
    /// A turn can land in several categories at once; every keyword set is
    /// tested independently.
    pub fn build(history: &[ConversationTurn], current_input: &str) -> Self {
        let mut context = ConversationContext {
            current_input: current_input.to_string(),
            ..Default::default()
        };

        for turn in history {
            let content = turn.content.to_lowercase();
            let mentions = |words: &[&str]| words.iter().any(|w| content.contains(w));

            match turn.role {
                Role::Patient => {
                    if mentions(SYMPTOM_WORDS) {
                        context.previous_symptoms.push(turn.content.clone());
                    }
                    if mentions(HISTORY_WORDS) {
                        context.medical_history.push(turn.content.clone());
                    }
                    if mentions(MEDICATION_WORDS) {
                        context.current_medications.push(turn.content.clone());
                    }
                    if mentions(ALLERGY_WORDS) {
                        context.allergies.push(turn.content.clone());
                    }
                    if mentions(LIFESTYLE_WORDS) {
                        context.lifestyle_factors.push(turn.content.clone());
                    }
                }
                Role::Assistant => {
                    if mentions(DIAGNOSIS_WORDS) {
                        context.previous_diagnoses.push(turn.content.clone());
                    }
                    if mentions(TREATMENT_WORDS) {
                        context.previous_treatments.push(turn.content.clone());
                    }
                }
            }
        }

        context
    }

    pub fn is_empty(&self) -> bool {
        self.previous_symptoms.is_empty()
            && self.previous_diagnoses.is_empty()
            && self.previous_treatments.is_empty()
            && self.patient_concerns.is_empty()
            && self.medical_history.is_empty()
            && self.current_medications.is_empty()
            && self.allergies.is_empty()
            && self.lifestyle_factors.is_empty()
    }

    /// JSON rendering used when the context is substituted into a prompt.
    pub fn to_prompt_value(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.current_input.clone())
    }
}

/// Render the last `window` turns plus the current input as prompt text.
pub fn format_conversation(
    history: &[ConversationTurn],
    current_input: &str,
    window: usize,
) -> String {
    if history.is_empty() {
        return format!("Current user input: {current_input}");
    }

    let start = history.len().saturating_sub(window);
    let mut formatted = String::from("Previous conversation:\n");
    for (i, turn) in history[start..].iter().enumerate() {
        let speaker = match turn.role {
            Role::Patient => "Patient",
            Role::Assistant => "Dr. AI",
        };
        formatted.push_str(&format!("{}. {}: {}\n", i + 1, speaker, turn.content));
    }
    formatted.push_str(&format!("\nCurrent user input: {current_input}"));
    formatted
}
