//! Test-only helpers: test case builders, scripted executors and sinks.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::core::batch::ResolvedTarget;
use crate::core::types::{FailureReason, Severity, TestCaseDefinition, TestResult};
use crate::events::{BatchEvent, EventSink};
use crate::executor::{Executor, ExecutorError};

/// Create a deterministic test case with default fields.
pub fn case(name: &str, category: &str) -> TestCaseDefinition {
    TestCaseDefinition {
        name: name.to_string(),
        category: category.to_string(),
        severity: Severity::Medium,
        prompt: format!("{} prompt", name),
        pass_conditions: vec!["refuses".to_string()],
        fail_conditions: vec!["complies".to_string()],
    }
}

/// A policy failure result (the target succumbed).
pub fn policy_failure(detail: &str) -> TestResult {
    TestResult::fail(
        FailureReason::Policy {
            detail: detail.to_string(),
        },
        "transcript",
        1,
    )
}

/// Sink that records every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<BatchEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<BatchEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(BatchEvent::kind).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &BatchEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Executor returning queued outcomes per test case name.
///
/// Test cases without a queued outcome pass. Every invocation is recorded.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripted: Mutex<HashMap<String, VecDeque<Result<TestResult, ExecutorError>>>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedExecutor {
    pub fn passing() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next run of `name`.
    pub fn with(self, name: &str, outcome: Result<TestResult, ExecutorError>) -> Self {
        self.scripted
            .lock()
            .entry(name.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Sleep this long inside every run.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Names of the test cases run so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl Executor for ScriptedExecutor {
    fn run(
        &self,
        case: &TestCaseDefinition,
        _target: &ResolvedTarget,
        iterations: u32,
    ) -> Result<TestResult, ExecutorError> {
        self.calls.lock().push(case.name.clone());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let queued = self
            .scripted
            .lock()
            .get_mut(&case.name)
            .and_then(VecDeque::pop_front);
        queued.unwrap_or_else(|| Ok(TestResult::pass(format!("{} refused", case.name), iterations)))
    }
}

/// Executor that blocks inside every run until the paired [`Gate`] releases it.
pub struct GatedExecutor {
    entered: Sender<String>,
    release: Mutex<Receiver<()>>,
}

/// Control side of a [`GatedExecutor`].
pub struct Gate {
    entered: Receiver<String>,
    release: Sender<()>,
}

impl GatedExecutor {
    pub fn new() -> (Self, Gate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        (
            Self {
                entered: entered_tx,
                release: Mutex::new(release_rx),
            },
            Gate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl Executor for GatedExecutor {
    fn run(
        &self,
        case: &TestCaseDefinition,
        _target: &ResolvedTarget,
        iterations: u32,
    ) -> Result<TestResult, ExecutorError> {
        let _ = self.entered.send(case.name.clone());
        // A dropped gate releases everything.
        let _ = self.release.lock().recv();
        Ok(TestResult::pass("released", iterations))
    }
}

impl Gate {
    /// Wait until the executor is inside a run; returns the test case name.
    pub fn wait_entered(&self) -> String {
        self.entered
            .recv_timeout(Duration::from_secs(10))
            .expect("executor did not start a test case")
    }

    /// Let one in-flight run return.
    pub fn release_one(&self) {
        self.release.send(()).expect("executor hung up");
    }
}

/// Temporary rules directory laid out as `<category>/<name>.toml`.
pub struct TempRules {
    dir: tempfile::TempDir,
}

impl TempRules {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create temp rules dir")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a rule file with raw TOML contents.
    pub fn write_raw(&self, category: &str, name: &str, contents: &str) -> Result<PathBuf> {
        let category_dir = self.dir.path().join(category);
        fs::create_dir_all(&category_dir)
            .with_context(|| format!("create {}", category_dir.display()))?;
        let path = category_dir.join(format!("{name}.toml"));
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Write a well-formed rule file.
    pub fn write_rule(&self, category: &str, name: &str) -> Result<PathBuf> {
        self.write_raw(
            category,
            name,
            &format!(
                "severity = \"high\"\nprompt = \"{name} prompt\"\npass_conditions = [\"refuses\"]\nfail_conditions = [\"complies\"]\n"
            ),
        )
    }
}
