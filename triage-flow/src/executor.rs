use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::{
    engine::ReasoningEngine,
    error::{StageFailure, TransportError},
    stage::{StageInputs, StageSpec},
};

/// Renders a stage prompt and sends it to the reasoning engine.
///
/// A failed or timed-out engine call becomes a [`StageFailure::Transport`]
/// tagged with the stage name. The executor never retries.
#[derive(Clone)]
pub struct StageExecutor {
    engine: Arc<dyn ReasoningEngine>,
    timeout: Duration,
}

impl StageExecutor {
    pub fn new(engine: Arc<dyn ReasoningEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub async fn execute(
        &self,
        stage: &StageSpec,
        inputs: &StageInputs,
    ) -> Result<String, StageFailure> {
        let prompt = stage.render(inputs);
        debug!(stage = %stage.name, prompt_len = prompt.len(), "Invoking reasoning engine");

        let outcome = match tokio::time::timeout(self.timeout, self.engine.generate(&prompt)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        };

        outcome.map_err(|source| {
            error!(stage = %stage.name, error = %source, "Reasoning engine call failed");
            StageFailure::Transport {
                stage: stage.name.clone(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedEngine;
    use async_trait::async_trait;

    struct SlowEngine;

    #[async_trait]
    impl ReasoningEngine for SlowEngine {
        async fn generate(&self, _prompt: &str) -> Result<String, TransportError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".into())
        }
    }

    #[tokio::test]
    async fn sends_rendered_prompt() {
        let engine = Arc::new(ScriptedEngine::new());
        engine.push_text("analysis");
        let executor = StageExecutor::new(engine.clone(), Duration::from_secs(5));
        let stage = StageSpec::new("s", "Symptom Analyzer", "Analyze {info}");

        let output = executor
            .execute(&stage, &StageInputs::new().with("info", "cough"))
            .await
            .unwrap();

        assert_eq!(output, "analysis");
        assert_eq!(engine.prompts(), vec!["Analyze cough".to_string()]);
    }

    #[tokio::test]
    async fn engine_error_is_tagged_with_stage() {
        let engine = Arc::new(ScriptedEngine::new());
        engine.push_error("backend down");
        let executor = StageExecutor::new(engine, Duration::from_secs(5));
        let stage = StageSpec::new("s", "Symptom Analyzer", "x");

        let failure = executor
            .execute(&stage, &StageInputs::new())
            .await
            .unwrap_err();

        assert_eq!(
            failure,
            StageFailure::Transport {
                stage: "Symptom Analyzer".into(),
                source: TransportError::Backend("backend down".into()),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_engine_times_out() {
        let executor = StageExecutor::new(Arc::new(SlowEngine), Duration::from_secs(2));
        let stage = StageSpec::new("s", "Diagnosis Reasoner", "x");

        let failure = executor
            .execute(&stage, &StageInputs::new())
            .await
            .unwrap_err();

        assert!(matches!(
            failure,
            StageFailure::Transport {
                source: TransportError::Timeout { seconds: 2 },
                ..
            }
        ));
    }
}
