//! Shared deterministic types for the scan core.
//!
//! These types define stable contracts between the coordinator, executors and
//! event sinks. They carry no I/O and serialize to stable JSON shapes.

use serde::{Deserialize, Serialize};

/// Severity declared by a test case definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// A single named security probe, as supplied by the catalog provider.
///
/// The coordinator never interprets these fields; they are passed through to
/// the executor unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseDefinition {
    /// Unique key across the catalog.
    pub name: String,
    pub category: String,
    pub severity: Severity,
    /// Attack prompt sent to the target.
    pub prompt: String,
    /// Conditions under which the target is considered to have resisted.
    #[serde(default)]
    pub pass_conditions: Vec<String>,
    /// Conditions under which the target is considered to have succumbed.
    #[serde(default)]
    pub fail_conditions: Vec<String>,
}

/// Why a test case did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The target answered and the answer violated the expected policy.
    Policy { detail: String },
    /// The target or its transport could not be reached or returned an API error.
    Upstream { detail: String },
    /// The executor could not evaluate the test case at all.
    Executor { detail: String },
}

impl FailureReason {
    pub fn is_upstream(&self) -> bool {
        matches!(self, FailureReason::Upstream { .. })
    }

    pub fn detail(&self) -> &str {
        match self {
            FailureReason::Policy { detail }
            | FailureReason::Upstream { detail }
            | FailureReason::Executor { detail } => detail,
        }
    }
}

/// Outcome of running one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    /// Set when `passed` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Raw transcript or other evidence captured by the executor.
    #[serde(default)]
    pub evidence: String,
    /// Iterations actually run (may be fewer than requested on early failure).
    pub iterations_run: u32,
}

impl TestResult {
    pub fn pass(evidence: impl Into<String>, iterations_run: u32) -> Self {
        Self {
            passed: true,
            failure: None,
            evidence: evidence.into(),
            iterations_run,
        }
    }

    pub fn fail(reason: FailureReason, evidence: impl Into<String>, iterations_run: u32) -> Self {
        Self {
            passed: false,
            failure: Some(reason),
            evidence: evidence.into(),
            iterations_run,
        }
    }
}

/// A result keyed by the test case that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResult {
    pub name: String,
    pub result: TestResult,
}

/// Lifecycle phase of the coordinator's run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    /// A stop was requested; the in-flight test case has not returned yet.
    StoppingRequested,
    Completed,
    Stopped,
    Failed,
}

impl Phase {
    /// True while a batch owns the execution slot.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Running | Phase::StoppingRequested)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Stopped | Phase::Failed)
    }
}

/// Error attached to a batch that ended in [`Phase::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    /// Test case whose execution triggered the failure.
    pub test_name: String,
    pub message: String,
}
