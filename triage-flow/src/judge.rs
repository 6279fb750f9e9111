use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    error::StageFailure,
    executor::StageExecutor,
    stage::{StageInputs, StageSpec},
};

pub const STAGE_NAME: &str = "stage_name";
pub const STAGE_OUTPUT: &str = "stage_output";
pub const ORIGINAL_USER_INPUT: &str = "original_user_input";

/// Outcome of one judge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub accepted: bool,
    pub error_message: Option<String>,
    pub suggested_corrections: Option<String>,
}

impl ValidationVerdict {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            error_message: None,
            suggested_corrections: None,
        }
    }

    pub fn rejected(error_message: impl Into<String>, corrections: impl Into<String>) -> Self {
        Self {
            accepted: false,
            error_message: Some(error_message.into()),
            suggested_corrections: Some(corrections.into()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerdictParseError {
    #[error("judge output is not JSON: {0}")]
    NotJson(String),

    #[error("judge output is not a JSON object")]
    NotAnObject,

    #[error("judge output does not match the verdict schema: {0}")]
    Schema(String),
}

/// Wire shape the judge is asked to produce.
///
/// `error` distinguishes a missing key from an explicit `null`: any present
/// `error` key rejects the output.
#[derive(Deserialize)]
struct WireVerdict {
    #[serde(default, deserialize_with = "present")]
    error: Option<Option<String>>,
    #[serde(default)]
    suggested_corrections: Option<String>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Decode judge text into a verdict. Anything that does not match the schema fails closed.
pub fn decode_verdict(raw: &str) -> Result<ValidationVerdict, VerdictParseError> {
    let cleaned = strip_code_fence(raw);

    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| VerdictParseError::NotJson(e.to_string()))?;
    if !value.is_object() {
        return Err(VerdictParseError::NotAnObject);
    }

    let wire =
        WireVerdict::deserialize(value).map_err(|e| VerdictParseError::Schema(e.to_string()))?;

    Ok(match wire.error {
        Some(message) => ValidationVerdict {
            accepted: false,
            error_message: Some(message.unwrap_or_default()),
            suggested_corrections: Some(wire.suggested_corrections.unwrap_or_default()),
        },
        None => ValidationVerdict {
            accepted: true,
            error_message: None,
            suggested_corrections: wire.suggested_corrections,
        },
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// The distinguished "judge" stage that accepts or rejects other stages' output.
///
/// Stateless: each call is independent of earlier verdicts.
#[derive(Clone)]
pub struct ValidationGate {
    judge: StageSpec,
    executor: StageExecutor,
}

impl ValidationGate {
    pub fn new(judge: StageSpec, executor: StageExecutor) -> Self {
        Self { judge, executor }
    }

    pub fn judge_name(&self) -> &str {
        &self.judge.name
    }

    /// Ask the judge about one stage output and return its raw reply.
    pub async fn ask(
        &self,
        stage: &StageSpec,
        stage_output: &str,
        original_user_input: &str,
    ) -> Result<String, StageFailure> {
        let inputs = StageInputs::new()
            .with(STAGE_NAME, stage.name.as_str())
            .with(STAGE_OUTPUT, stage_output)
            .with(ORIGINAL_USER_INPUT, original_user_input);
        self.executor.execute(&self.judge, &inputs).await
    }

    /// Turn the judge's raw reply into a verdict for `stage`.
    pub fn decode(&self, stage: &StageSpec, raw: &str) -> Result<ValidationVerdict, StageFailure> {
        match decode_verdict(raw) {
            Ok(verdict) => {
                debug!(stage = %stage.name, accepted = verdict.accepted, "Decoded judge verdict");
                Ok(verdict)
            }
            Err(e) => {
                warn!(stage = %stage.name, error = %e, raw = %raw, "Could not parse judge output");
                Err(StageFailure::ValidationParse {
                    stage: stage.name.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_without_error_is_accepted() {
        let verdict = decode_verdict(r#"{"status":"ok"}"#).unwrap();
        assert_eq!(verdict, ValidationVerdict::accepted());
    }

    #[test]
    fn error_key_rejects_with_corrections() {
        let verdict =
            decode_verdict(r#"{"error": "too vague", "suggested_corrections": "ask duration"}"#)
                .unwrap();
        assert_eq!(verdict, ValidationVerdict::rejected("too vague", "ask duration"));
    }

    #[test]
    fn missing_corrections_default_to_empty() {
        let verdict = decode_verdict(r#"{"error": "unsafe advice"}"#).unwrap();
        assert!(!verdict.accepted);
        assert_eq!(verdict.suggested_corrections.as_deref(), Some(""));
    }

    #[test]
    fn null_error_still_rejects() {
        let verdict = decode_verdict(r#"{"error": null}"#).unwrap();
        assert!(!verdict.accepted);
        assert_eq!(verdict.error_message.as_deref(), Some(""));
    }

    #[test]
    fn fenced_json_is_accepted() {
        let verdict = decode_verdict("```json\n{\"validated_output\": \"fine\"}\n```").unwrap();
        assert!(verdict.accepted);
    }

    #[test]
    fn prose_fails_closed() {
        assert!(matches!(
            decode_verdict("Looks good to me!"),
            Err(VerdictParseError::NotJson(_))
        ));
    }

    #[test]
    fn non_object_fails_closed() {
        assert_eq!(
            decode_verdict(r#"["error"]"#),
            Err(VerdictParseError::NotAnObject)
        );
    }

    #[test]
    fn non_text_error_fails_closed() {
        assert!(matches!(
            decode_verdict(r#"{"error": {"code": 3}}"#),
            Err(VerdictParseError::Schema(_))
        ));
    }
}
