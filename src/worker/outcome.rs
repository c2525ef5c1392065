//! Per-request lifecycle state and outcome record.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one request.
///
/// ```text
/// Received -> Validating -> Rejected
///                        -> Failed
///                        -> Submitted -> Completed
///                                     -> Failed
/// ```
///
/// `Rejected` covers requests refused before anything reached the runtime.
/// `Failed` straight from `Validating` means a store error stopped the checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Received,
    Validating,
    Rejected,
    Submitted,
    Completed,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Validating)
                | (Self::Validating, Self::Rejected)
                | (Self::Validating, Self::Failed)
                | (Self::Validating, Self::Submitted)
                | (Self::Submitted, Self::Completed)
                | (Self::Submitted, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Rejected => "rejected",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final record of one handled request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestOutcome {
    /// `requestId` of the payload, empty when it could not be read.
    pub request_id: String,
    /// Terminal state reached.
    pub state: RequestState,
    /// Status reported to the dispatcher.
    pub status: bool,
    /// Message reported to the dispatcher.
    pub message: String,
    /// Error text when execution failed with an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Identifier of the pipeline run, when one was submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Time spent handling the request, in milliseconds.
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl RequestOutcome {
    pub fn new(
        request_id: impl Into<String>,
        state: RequestState,
        status: bool,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            state,
            status,
            message: message.into(),
            error: None,
            run_id: None,
            duration_ms: duration.as_millis() as u64,
            completed_at: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use RequestState::*;

        assert!(Received.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Rejected));
        assert!(Validating.can_transition_to(Failed));
        assert!(Validating.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Completed));
        assert!(Submitted.can_transition_to(Failed));

        assert!(!Received.can_transition_to(Submitted));
        assert!(!Rejected.can_transition_to(Submitted));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Submitted.can_transition_to(Rejected));
    }

    #[test]
    fn test_terminal_states() {
        assert!(RequestState::Rejected.is_terminal());
        assert!(RequestState::Completed.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(!RequestState::Submitted.is_terminal());
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = RequestOutcome::new(
            "12345",
            RequestState::Completed,
            true,
            "pipeline completed",
            Duration::from_millis(1500),
        )
        .with_run_id("run-1");

        let json = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(json["state"], "completed");
        assert_eq!(json["run_id"], "run-1");
        assert_eq!(json["duration_ms"], 1500);
        assert!(json.get("error").is_none());

        let parsed: RequestOutcome = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, outcome);
        assert_eq!(parsed.duration(), Duration::from_millis(1500));
    }
}
