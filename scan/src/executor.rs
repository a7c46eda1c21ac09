//! Test executor contract.
//!
//! The [`Executor`] trait decouples batch orchestration from how a test case is
//! actually evaluated against a target (calling a model, scoring the answer).
//! Tests use scripted executors; the CLI and HTTP hosts use
//! [`crate::io::executor::CommandExecutor`].

use thiserror::Error;

use crate::core::batch::ResolvedTarget;
use crate::core::types::{TestCaseDefinition, TestResult};

/// Failure to produce a [`TestResult`] for a test case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// The target or its transport is unreachable or returned an API error.
    #[error("upstream failure: {message}")]
    Upstream { message: String },

    /// The transport did not answer within the executor's own timeout.
    #[error("upstream timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// This test case could not be evaluated; other test cases may still run.
    #[error("invalid test case: {message}")]
    InvalidTestCase { message: String },
}

/// Abstraction over test execution backends.
///
/// The coordinator never calls `run` concurrently with itself, but it may be
/// called while other threads query status or request a stop. Calls may block
/// for as long as the target takes to answer.
pub trait Executor: Send + Sync {
    fn run(
        &self,
        case: &TestCaseDefinition,
        target: &ResolvedTarget,
        iterations: u32,
    ) -> Result<TestResult, ExecutorError>;
}
