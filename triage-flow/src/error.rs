use thiserror::Error;

/// Failure of an external call (reasoning engine or enrichment service).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{0}")]
    Backend(String),

    #[error("call timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// A stage-level failure that short-circuits the pipeline.
///
/// The `Display` form is what the caller shows to the user. Every variant
/// starts with `Error` so a failure can be recognised from the text alone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageFailure {
    #[error("Error in {stage}: {source}")]
    Transport {
        stage: String,
        #[source]
        source: TransportError,
    },

    #[error("Error parsing validation result for {stage}")]
    ValidationParse { stage: String },

    #[error("Error: max retries reached for {stage}: {message}")]
    MaxRetriesExceeded { stage: String, message: String },

    #[error("Error: no previous stage available for clarification of {stage}")]
    ClarificationUnavailable { stage: String },
}

impl StageFailure {
    pub fn stage(&self) -> &str {
        match self {
            StageFailure::Transport { stage, .. }
            | StageFailure::ValidationParse { stage }
            | StageFailure::MaxRetriesExceeded { stage, .. }
            | StageFailure::ClarificationUnavailable { stage } => stage,
        }
    }

    /// Short machine-readable tag for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            StageFailure::Transport { .. } => "transport",
            StageFailure::ValidationParse { .. } => "validation_parse",
            StageFailure::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            StageFailure::ClarificationUnavailable { .. } => "clarification_unavailable",
        }
    }
}

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for TriageError {
    fn from(err: sqlx::Error) -> Self {
        TriageError::Persistence(err.to_string())
    }
}

impl From<serde_yaml::Error> for TriageError {
    fn from(err: serde_yaml::Error) -> Self {
        TriageError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_text_is_prefixed_and_tagged() {
        let failures = [
            StageFailure::Transport {
                stage: "Symptom Analyzer".into(),
                source: TransportError::Backend("connection refused".into()),
            },
            StageFailure::ValidationParse {
                stage: "Symptom Analyzer".into(),
            },
            StageFailure::MaxRetriesExceeded {
                stage: "Symptom Analyzer".into(),
                message: "too vague".into(),
            },
            StageFailure::ClarificationUnavailable {
                stage: "Symptom Analyzer".into(),
            },
        ];

        for failure in failures {
            let text = failure.to_string();
            assert!(text.starts_with("Error"), "{text}");
            assert!(text.contains("Symptom Analyzer"), "{text}");
            assert_eq!(failure.stage(), "Symptom Analyzer");
        }
    }

    #[test]
    fn transport_failure_carries_backend_message() {
        let failure = StageFailure::Transport {
            stage: "Judge Agent".into(),
            source: TransportError::Timeout { seconds: 30 },
        };
        assert_eq!(
            failure.to_string(),
            "Error in Judge Agent: call timed out after 30s"
        );
        assert_eq!(failure.kind(), "transport");
    }
}
