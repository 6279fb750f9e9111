use tracing::{error, info, warn};

use crate::{
    error::StageFailure,
    executor::StageExecutor,
    judge::ValidationGate,
    recorder::{Recorder, RequestScope},
    stage::{CORRECTIONS, StageInputs, StageInvocation, StageSpec},
    storage::LogStatus,
};

/// Default bound on judge rejections per stage.
pub const MAX_RETRIES: u32 = 3;

/// Result of driving one stage through the execute/validate loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    pub result: Result<String, StageFailure>,
    /// Number of executor calls made.
    pub attempts: u32,
}

/// Runs a stage, asks the judge about it, and retries with the judge's
/// corrections until it is accepted or the rejection bound is hit.
///
/// Executor failures, judge transport failures and unparseable verdicts end
/// the loop at once and do not count as rejections.
#[derive(Clone)]
pub struct RetryController {
    executor: StageExecutor,
    gate: ValidationGate,
    recorder: Recorder,
    max_retries: u32,
}

impl RetryController {
    pub fn new(
        executor: StageExecutor,
        gate: ValidationGate,
        recorder: Recorder,
        max_retries: u32,
    ) -> Self {
        Self {
            executor,
            gate,
            recorder,
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn run(
        &self,
        stage: &StageSpec,
        inputs: &StageInputs,
        scope: &RequestScope,
    ) -> RetryOutcome {
        let sender = if scope.entry_stage.as_deref() == Some(stage.id.as_str()) {
            "user"
        } else {
            stage.name.as_str()
        };
        let judge = self.gate.judge_name().to_string();

        let mut current_inputs = inputs.clone();
        let mut attempts = 0;
        let mut rejections = 0;

        loop {
            attempts += 1;
            let mut invocation = StageInvocation::new(stage, current_inputs.clone());
            let rendered_inputs = invocation.inputs.to_string();
            info!(
                stage = %stage.name,
                attempt = attempts,
                max_retries = self.max_retries,
                "Executing stage"
            );

            let output = match self.executor.execute(stage, &invocation.inputs).await {
                Ok(output) => output,
                Err(failure) => {
                    let message = failure.to_string();
                    self.recorder
                        .append(
                            scope,
                            sender,
                            &judge,
                            &rendered_inputs,
                            Some(&message),
                            LogStatus::Failed,
                        )
                        .await;
                    return RetryOutcome {
                        result: Err(failure),
                        attempts,
                    };
                }
            };

            self.recorder
                .remember(scope, &stage.id, &stage.name, &output)
                .await;
            let entry_id = self
                .recorder
                .append(
                    scope,
                    sender,
                    &judge,
                    &rendered_inputs,
                    None,
                    LogStatus::Pending,
                )
                .await;

            let raw_verdict = match self.gate.ask(stage, &output, &scope.user_input).await {
                Ok(raw) => raw,
                Err(failure) => {
                    let message = failure.to_string();
                    self.recorder
                        .append(scope, &judge, &stage.name, &output, Some(&message), LogStatus::Failed)
                        .await;
                    self.recorder.settle(entry_id, &output, LogStatus::Failed).await;
                    return RetryOutcome {
                        result: Err(failure),
                        attempts,
                    };
                }
            };

            let verdict = self.gate.decode(stage, &raw_verdict);
            let verdict_status = if verdict.is_ok() {
                LogStatus::Completed
            } else {
                LogStatus::Failed
            };
            self.recorder
                .append(scope, &judge, &stage.name, &output, Some(&raw_verdict), verdict_status)
                .await;

            let verdict = match verdict {
                Ok(verdict) => verdict,
                Err(failure) => {
                    self.recorder.settle(entry_id, &output, LogStatus::Failed).await;
                    return RetryOutcome {
                        result: Err(failure),
                        attempts,
                    };
                }
            };

            if verdict.accepted {
                self.recorder
                    .settle(entry_id, &output, LogStatus::Completed)
                    .await;
                invocation.complete(output);
                info!(stage = %stage.name, attempts, "Stage output accepted");
                return RetryOutcome {
                    result: Ok(invocation.raw_output),
                    attempts,
                };
            }

            self.recorder.settle(entry_id, &output, LogStatus::Failed).await;
            invocation.fail(output);
            rejections += 1;

            let message = verdict.error_message.unwrap_or_default();
            if rejections >= self.max_retries {
                error!(
                    stage = %stage.name,
                    attempts,
                    last_error = %message,
                    "Maximum retry attempts exceeded"
                );
                return RetryOutcome {
                    result: Err(StageFailure::MaxRetriesExceeded {
                        stage: stage.name.clone(),
                        message,
                    }),
                    attempts,
                };
            }

            warn!(stage = %stage.name, attempt = attempts, reason = %message, "Judge rejected stage output");
            current_inputs.set(
                CORRECTIONS,
                verdict.suggested_corrections.unwrap_or_default(),
            );
        }
    }
}
