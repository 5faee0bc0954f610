//! The executor's result alphabet (§4.4): every step resolves to one of
//! three outcomes, never a bare `Result`, so the controller (C6) can fold
//! partial failure into the next `GroupState` without matching on HTTP
//! internals.

use autoscale_convergence::Step;
use autoscale_http::HttpError;

#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    Success,
    RetryableFailure(String),
    FatalFailure(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success)
    }
}

/// Classifies an `HttpError` the way §4.4 does: 429/5xx/connection errors
/// are retryable, everything else (4xx other than 429, malformed JSON,
/// bad URLs) is fatal for that step.
pub fn classify(err: &HttpError) -> StepOutcome {
    if err.is_retryable() {
        StepOutcome::RetryableFailure(err.to_string())
    } else {
        StepOutcome::FatalFailure(err.to_string())
    }
}

/// One step's outcome paired with the step it came from, for callers that
/// need to correlate results back to the plan (the controller updates
/// `GroupState` per step).
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutedStep {
    pub step: Step,
    pub outcome: StepOutcome,
}
