use tracing::{info, warn};

use crate::{
    error::StageFailure,
    recorder::{Recorder, RequestScope},
    retry::RetryController,
    stage::{CLARIFICATION_REQUEST, CLARIFICATION_RESPONSE, StageInputs, StageSpec},
    storage::LogStatus,
};

/// Phrase a stage uses to ask its predecessor for more information.
pub const DEFAULT_TRIGGER_PHRASE: &str = "clarification request";

/// A stage that can answer a clarification request, with the inputs it originally ran on.
#[derive(Debug, Clone, Copy)]
pub struct Predecessor<'a> {
    pub stage: &'a StageSpec,
    pub inputs: &'a StageInputs,
}

/// Messages exchanged during one backtracking hop. Dropped once the hop ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClarificationExchange {
    pub requesting_stage: String,
    pub target_stage: String,
    pub request_text: String,
    pub response_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClarifiedOutcome {
    pub result: Result<String, StageFailure>,
    /// Executor calls made for the requesting stage, across both runs.
    pub attempts: u32,
    /// Executor calls made for the predecessor during the hop.
    pub predecessor_attempts: u32,
    pub clarified: bool,
}

/// Wraps the retry loop for stages that may ask their predecessor for more information.
///
/// At most one hop: predecessor once, then the requesting stage once more. The
/// second result is returned as is, even if it asks for clarification again.
#[derive(Clone)]
pub struct ClarificationCoordinator {
    retry: RetryController,
    recorder: Recorder,
    trigger: String,
}

impl ClarificationCoordinator {
    pub fn new(retry: RetryController, recorder: Recorder, trigger: impl Into<String>) -> Self {
        Self {
            retry,
            recorder,
            trigger: trigger.into().to_lowercase(),
        }
    }

    pub fn requests_clarification(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.trigger)
    }

    pub async fn run(
        &self,
        stage: &StageSpec,
        inputs: &StageInputs,
        predecessor: Option<Predecessor<'_>>,
        scope: &RequestScope,
    ) -> ClarifiedOutcome {
        let first = self.retry.run(stage, inputs, scope).await;
        let request_text = match first.result {
            Ok(text) if self.requests_clarification(&text) => text,
            result => {
                return ClarifiedOutcome {
                    result,
                    attempts: first.attempts,
                    predecessor_attempts: 0,
                    clarified: false,
                };
            }
        };

        let Some(predecessor) = predecessor else {
            warn!(stage = %stage.name, "Clarification requested but no predecessor is configured");
            return ClarifiedOutcome {
                result: Err(StageFailure::ClarificationUnavailable {
                    stage: stage.name.clone(),
                }),
                attempts: first.attempts,
                predecessor_attempts: 0,
                clarified: false,
            };
        };

        info!(
            stage = %stage.name,
            target = %predecessor.stage.name,
            "Stage requested clarification"
        );
        self.recorder
            .append(
                scope,
                &stage.name,
                &predecessor.stage.name,
                &request_text,
                None,
                LogStatus::Pending,
            )
            .await;
        self.recorder
            .remember(scope, CLARIFICATION_REQUEST, &stage.name, &request_text)
            .await;

        let mut predecessor_inputs = predecessor.inputs.clone();
        predecessor_inputs.set(CLARIFICATION_REQUEST, request_text.as_str());
        let answer = self
            .retry
            .run(predecessor.stage, &predecessor_inputs, scope)
            .await;
        let response_text = match answer.result {
            Ok(text) => text,
            Err(failure) => {
                return ClarifiedOutcome {
                    result: Err(failure),
                    attempts: first.attempts,
                    predecessor_attempts: answer.attempts,
                    clarified: false,
                };
            }
        };

        let exchange = ClarificationExchange {
            requesting_stage: stage.name.clone(),
            target_stage: predecessor.stage.name.clone(),
            request_text,
            response_text,
        };

        let mut retry_inputs = inputs.clone();
        retry_inputs.set(CLARIFICATION_RESPONSE, exchange.response_text.as_str());
        let second = self.retry.run(stage, &retry_inputs, scope).await;

        if matches!(&second.result, Ok(text) if self.requests_clarification(text)) {
            warn!(
                stage = %exchange.requesting_stage,
                target = %exchange.target_stage,
                "Stage still requests clarification after one hop; returning its output as is"
            );
        }

        ClarifiedOutcome {
            result: second.result,
            attempts: first.attempts + second.attempts,
            predecessor_attempts: answer.attempts,
            clarified: true,
        }
    }
}
