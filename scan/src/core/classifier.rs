//! Deterministic classification of executor outcomes into fatal vs nonfatal.

use serde::{Deserialize, Serialize};

use crate::core::types::{FailureReason, TestResult};
use crate::executor::ExecutorError;

/// What the coordinator does when a test case hits an upstream failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalPolicy {
    /// End the batch in `Failed`; remaining test cases are not run.
    #[default]
    AbortBatch,
    /// Record the upstream failure as a failed result and move on.
    Continue,
}

/// Coordinator-level decision for one executor outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Record the result and continue with the next test case.
    Record(TestResult),
    /// Stop the batch; the result is not recorded.
    Abort { message: String },
}

/// Classify an executor outcome under `policy`.
///
/// - `Ok` with a non-upstream failure (or a pass) is always recorded.
/// - Upstream failures, whether returned as an error or as a result with an
///   upstream failure reason, abort under [`FatalPolicy::AbortBatch`].
/// - `InvalidTestCase` is recorded as a failed result with an executor reason.
pub fn classify_outcome(
    outcome: Result<TestResult, ExecutorError>,
    policy: FatalPolicy,
) -> Verdict {
    let (message, result) = match outcome {
        Ok(result) => {
            let Some(detail) = result
                .failure
                .as_ref()
                .filter(|reason| reason.is_upstream())
                .map(|reason| reason.detail().to_string())
            else {
                return Verdict::Record(result);
            };
            (detail, result)
        }
        Err(ExecutorError::InvalidTestCase { message }) => {
            return Verdict::Record(TestResult::fail(
                FailureReason::Executor { detail: message },
                String::new(),
                0,
            ));
        }
        Err(err @ (ExecutorError::Upstream { .. } | ExecutorError::Timeout { .. })) => {
            let message = err.to_string();
            let result = TestResult::fail(
                FailureReason::Upstream {
                    detail: message.clone(),
                },
                String::new(),
                0,
            );
            (message, result)
        }
    };

    match policy {
        FatalPolicy::AbortBatch => Verdict::Abort { message },
        FatalPolicy::Continue => Verdict::Record(result),
    }
}
