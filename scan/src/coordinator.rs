//! Batch lifecycle: one batch at a time, sequential test execution,
//! cooperative cancellation and fatal short-circuiting.
//!
//! [`RunCoordinator`] owns the only mutable run state. Callers interact with
//! it through [`RunCoordinator::submit_batch`], [`RunCoordinator::request_stop`]
//! and [`RunCoordinator::current_status`]; all mutation happens on the batch's
//! own execution thread.
//!
//! Locking:
//! - `state` is held only for short field updates and snapshots, never across
//!   an executor call or a sink call.
//! - `gate` serialises "enter/leave the active phase + emit the matching event"
//!   so a new batch's `batch_started` can never overtake the previous batch's
//!   terminal event.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::batch::{BatchConfig, ConfigIssue, ResolvedTarget};
use crate::core::catalog::Catalog;
use crate::core::classifier::{FatalPolicy, Verdict, classify_outcome};
use crate::core::selector::select_cases;
use crate::core::types::{BatchError, Phase, RecordedResult, TestCaseDefinition};
use crate::events::{BatchEvent, EventSink};
use crate::executor::{Executor, ExecutorError};

/// Errors returned synchronously to coordinator callers.
///
/// None of these ever reach the event sink.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("invalid batch config: {0}")]
    InvalidConfig(ConfigIssue),

    #[error("a batch is already running")]
    AlreadyRunning,

    #[error("no batch is running")]
    NotRunning,

    #[error("spawn batch thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("batch thread panicked")]
    Panicked,
}

impl OrchestrationError {
    /// Stable reason code for external callers.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestrationError::InvalidConfig(_) => "invalid_config",
            OrchestrationError::AlreadyRunning => "already_running",
            OrchestrationError::NotRunning => "not_running",
            OrchestrationError::Spawn(_) | OrchestrationError::Panicked => "internal",
        }
    }
}

/// Coordinator-wide settings that apply to every batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub fatal_policy: FatalPolicy,
}

/// Consistent copy of the observer-relevant run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStateSnapshot {
    pub batch_id: Option<Uuid>,
    pub phase: Phase,
    pub total_count: usize,
    pub completed_count: usize,
    /// In-flight test case; `None` when idle or terminal.
    pub current_test_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<BatchError>,
}

/// Final state of a batch, returned by [`BatchHandle::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    /// One of the terminal phases.
    pub phase: Phase,
    pub results: Vec<RecordedResult>,
    pub error: Option<BatchError>,
}

/// Handle to an accepted batch. Dropping it detaches the batch.
#[derive(Debug)]
pub struct BatchHandle {
    batch_id: Uuid,
    join: JoinHandle<BatchOutcome>,
}

impl BatchHandle {
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Block until the batch reaches a terminal phase.
    pub fn wait(self) -> Result<BatchOutcome, OrchestrationError> {
        self.join.join().map_err(|_| OrchestrationError::Panicked)
    }
}

/// Owner of the run state and the single execution slot.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct RunCoordinator {
    shared: Arc<Shared>,
}

struct Shared {
    catalog: Catalog,
    executor: Arc<dyn Executor>,
    sink: Arc<dyn EventSink>,
    settings: CoordinatorSettings,
    state: Mutex<RunState>,
    gate: Mutex<()>,
}

struct RunState {
    batch_id: Option<Uuid>,
    phase: Phase,
    total_count: usize,
    completed_count: usize,
    current_test_name: Option<String>,
    results: Vec<RecordedResult>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    last_error: Option<BatchError>,
    /// Cancellation flag of the batch this state belongs to.
    stop_requested: Arc<AtomicBool>,
}

impl RunState {
    fn idle() -> Self {
        Self {
            batch_id: None,
            phase: Phase::Idle,
            total_count: 0,
            completed_count: 0,
            current_test_name: None,
            results: Vec::new(),
            started_at: None,
            ended_at: None,
            last_error: None,
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    fn running(batch_id: Uuid, total_count: usize, stop_requested: Arc<AtomicBool>) -> Self {
        Self {
            batch_id: Some(batch_id),
            phase: Phase::Running,
            total_count,
            started_at: Some(Utc::now()),
            stop_requested,
            ..Self::idle()
        }
    }

    fn snapshot(&self) -> RunStateSnapshot {
        let phase = if self.phase == Phase::Running && self.stop_requested.load(Ordering::SeqCst) {
            Phase::StoppingRequested
        } else {
            self.phase
        };
        RunStateSnapshot {
            batch_id: self.batch_id,
            phase,
            total_count: self.total_count,
            completed_count: self.completed_count,
            current_test_name: self.current_test_name.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            last_error: self.last_error.clone(),
        }
    }
}

enum Terminal {
    Completed,
    Stopped,
    Failed(BatchError),
}

impl RunCoordinator {
    pub fn new(
        catalog: Catalog,
        executor: Arc<dyn Executor>,
        sink: Arc<dyn EventSink>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                catalog,
                executor,
                sink,
                settings,
                state: Mutex::new(RunState::idle()),
                gate: Mutex::new(()),
            }),
        }
    }

    /// Catalog every batch is selected from.
    pub fn catalog(&self) -> &Catalog {
        &self.shared.catalog
    }

    /// Validate `config`, claim the execution slot and start the batch on its
    /// own thread. Returns as soon as the batch is running.
    ///
    /// Sinks receive `batch_started` before this returns. A sink must not call
    /// `submit_batch` from inside `emit`.
    pub fn submit_batch(&self, config: BatchConfig) -> Result<BatchHandle, OrchestrationError> {
        let shared = &self.shared;
        let _gate = shared.gate.lock();

        if shared.state.lock().phase.is_active() {
            debug!("rejecting submission: batch already running");
            return Err(OrchestrationError::AlreadyRunning);
        }
        config
            .validate()
            .map_err(OrchestrationError::InvalidConfig)?;

        let cases = select_cases(&shared.catalog, config.selection());
        if cases.is_empty() {
            warn!(target = %config.target_model, "selection matched no test cases");
        }

        let batch_id = Uuid::new_v4();
        let total = cases.len();
        let stop_requested = Arc::new(AtomicBool::new(false));
        *shared.state.lock() = RunState::running(batch_id, total, Arc::clone(&stop_requested));

        info!(
            %batch_id,
            total,
            target = %config.target_model,
            target_type = %config.target_model_type,
            "batch started"
        );
        shared.emit(&BatchEvent::BatchStarted { batch_id, total });

        let target = config.resolve();
        let iterations = config.iterations;
        let worker = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("scan-batch-{batch_id}"))
            .spawn(move || worker.run_batch(batch_id, cases, target, iterations, stop_requested));

        match spawned {
            Ok(join) => Ok(BatchHandle { batch_id, join }),
            Err(err) => {
                warn!(%batch_id, error = %err, "failed to spawn batch thread");
                let error = BatchError {
                    test_name: String::new(),
                    message: format!("spawn batch thread: {err}"),
                };
                shared.transition_locked(batch_id, Terminal::Failed(error));
                Err(OrchestrationError::Spawn(err))
            }
        }
    }

    /// Ask the running batch to stop before its next test case.
    ///
    /// Idempotent while a batch is active. The in-flight test case, if any, is
    /// allowed to finish.
    pub fn request_stop(&self) -> Result<(), OrchestrationError> {
        let state = self.shared.state.lock();
        if !state.phase.is_active() {
            return Err(OrchestrationError::NotRunning);
        }
        if !state.stop_requested.swap(true, Ordering::SeqCst) {
            info!(batch_id = ?state.batch_id, "stop requested");
        }
        Ok(())
    }

    pub fn current_status(&self) -> RunStateSnapshot {
        self.shared.state.lock().snapshot()
    }

    /// Results of the live (or most recent) batch, in completion order.
    pub fn current_results(&self) -> Vec<RecordedResult> {
        self.shared.state.lock().results.clone()
    }
}

impl Shared {
    fn run_batch(
        &self,
        batch_id: Uuid,
        cases: Vec<TestCaseDefinition>,
        target: ResolvedTarget,
        iterations: u32,
        stop_requested: Arc<AtomicBool>,
    ) -> BatchOutcome {
        let total = cases.len();
        for (position, case) in cases.iter().enumerate() {
            if stop_requested.load(Ordering::SeqCst) {
                info!(%batch_id, completed = position, total, "batch stopped");
                return self.finish(batch_id, Terminal::Stopped);
            }

            let index = position + 1;
            self.state.lock().current_test_name = Some(case.name.clone());
            debug!(%batch_id, test = %case.name, index, total, "test started");
            self.emit(&BatchEvent::TestStarted {
                batch_id,
                name: case.name.clone(),
                index,
                total,
            });

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.executor.run(case, &target, iterations)
            }))
            .unwrap_or_else(|payload| {
                Err(ExecutorError::Upstream {
                    message: format!("executor panicked: {}", panic_message(payload.as_ref())),
                })
            });

            match classify_outcome(outcome, self.settings.fatal_policy) {
                Verdict::Record(result) => {
                    {
                        let mut state = self.state.lock();
                        state.results.push(RecordedResult {
                            name: case.name.clone(),
                            result: result.clone(),
                        });
                        state.completed_count += 1;
                    }
                    debug!(%batch_id, test = %case.name, passed = result.passed, "test completed");
                    self.emit(&BatchEvent::TestCompleted {
                        batch_id,
                        name: case.name.clone(),
                        result,
                    });
                }
                Verdict::Abort { message } => {
                    warn!(%batch_id, test = %case.name, error = %message, "fatal upstream failure, aborting batch");
                    let error = BatchError {
                        test_name: case.name.clone(),
                        message,
                    };
                    return self.finish(batch_id, Terminal::Failed(error));
                }
            }
        }

        info!(%batch_id, total, "batch completed");
        self.finish(batch_id, Terminal::Completed)
    }

    /// Deliver `event` to the sink. A panicking sink is logged and otherwise ignored.
    fn emit(&self, event: &BatchEvent) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.sink.emit(event))) {
            warn!(
                kind = event.kind(),
                batch_id = %event.batch_id(),
                error = %panic_message(payload.as_ref()),
                "event sink panicked"
            );
        }
    }

    fn finish(&self, batch_id: Uuid, terminal: Terminal) -> BatchOutcome {
        let _gate = self.gate.lock();
        self.transition_locked(batch_id, terminal)
    }

    /// Move to a terminal phase and emit the terminal event. Caller holds `gate`.
    fn transition_locked(&self, batch_id: Uuid, terminal: Terminal) -> BatchOutcome {
        let (event, outcome) = {
            let mut state = self.state.lock();
            state.current_test_name = None;
            state.ended_at = Some(Utc::now());
            let results = state.results.clone();
            let (phase, event, error) = match terminal {
                Terminal::Completed => (
                    Phase::Completed,
                    BatchEvent::BatchCompleted {
                        batch_id,
                        results: results.clone(),
                    },
                    None,
                ),
                Terminal::Stopped => (
                    Phase::Stopped,
                    BatchEvent::BatchStopped {
                        batch_id,
                        partial_results: results.clone(),
                    },
                    None,
                ),
                Terminal::Failed(error) => (
                    Phase::Failed,
                    BatchEvent::BatchFailed {
                        batch_id,
                        partial_results: results.clone(),
                        error: error.clone(),
                    },
                    Some(error),
                ),
            };
            state.phase = phase;
            state.last_error = error.clone();
            let outcome = BatchOutcome {
                batch_id,
                phase,
                results,
                error,
            };
            (event, outcome)
        };
        self.emit(&event);
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestResult;
    use crate::test_support::{RecordingSink, ScriptedExecutor, case};

    fn coordinator(executor: ScriptedExecutor, sink: Arc<RecordingSink>) -> RunCoordinator {
        let catalog = Catalog::new(vec![case("a", "x"), case("b", "x"), case("c", "y")])
            .expect("catalog");
        RunCoordinator::new(
            catalog,
            Arc::new(executor),
            sink,
            CoordinatorSettings::default(),
        )
    }

    #[test]
    fn starts_idle() {
        let coord = coordinator(ScriptedExecutor::passing(), Arc::new(RecordingSink::default()));
        let status = coord.current_status();
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.batch_id, None);
        assert_eq!(status.total_count, 0);
        assert!(coord.current_results().is_empty());
    }

    #[test]
    fn invalid_config_leaves_state_untouched() {
        let sink = Arc::new(RecordingSink::default());
        let coord = coordinator(ScriptedExecutor::passing(), Arc::clone(&sink));
        let err = coord
            .submit_batch(BatchConfig::for_target("", "openai"))
            .expect_err("invalid");
        assert!(matches!(
            err,
            OrchestrationError::InvalidConfig(ConfigIssue { field: "target_model", .. })
        ));
        assert_eq!(err.code(), "invalid_config");
        assert_eq!(coord.current_status().phase, Phase::Idle);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn empty_selection_completes_without_running_anything() {
        let sink = Arc::new(RecordingSink::default());
        let coord = coordinator(ScriptedExecutor::passing(), Arc::clone(&sink));
        let config = BatchConfig {
            rule_categories: vec!["missing".to_string()],
            ..BatchConfig::for_target("gpt-4o", "openai")
        };
        let outcome = coord
            .submit_batch(config)
            .expect("submit")
            .wait()
            .expect("wait");

        assert_eq!(outcome.phase, Phase::Completed);
        assert!(outcome.results.is_empty());
        assert_eq!(sink.kinds(), vec!["batch_started", "batch_completed"]);
        assert_eq!(coord.current_status().total_count, 0);
    }

    #[test]
    fn stop_when_idle_is_not_running() {
        let coord = coordinator(ScriptedExecutor::passing(), Arc::new(RecordingSink::default()));
        assert!(matches!(
            coord.request_stop(),
            Err(OrchestrationError::NotRunning)
        ));
    }

    #[test]
    fn executor_panic_is_classified_as_fatal() {
        struct Panicking;
        impl Executor for Panicking {
            fn run(
                &self,
                _case: &TestCaseDefinition,
                _target: &ResolvedTarget,
                _iterations: u32,
            ) -> Result<TestResult, ExecutorError> {
                panic!("boom");
            }
        }

        let sink = Arc::new(RecordingSink::default());
        let catalog = Catalog::new(vec![case("a", "x")]).expect("catalog");
        let coord = RunCoordinator::new(
            catalog,
            Arc::new(Panicking),
            sink.clone(),
            CoordinatorSettings::default(),
        );
        let outcome = coord
            .submit_batch(BatchConfig::for_target("gpt-4o", "openai"))
            .expect("submit")
            .wait()
            .expect("wait");

        assert_eq!(outcome.phase, Phase::Failed);
        let error = outcome.error.expect("error");
        assert_eq!(error.test_name, "a");
        assert!(error.message.contains("boom"));
        assert_eq!(coord.current_status().last_error, Some(error));
    }

    #[test]
    fn terminal_state_clears_current_test_and_sets_end_time() {
        let sink = Arc::new(RecordingSink::default());
        let coord = coordinator(ScriptedExecutor::passing(), sink);
        let outcome = coord
            .submit_batch(BatchConfig::for_target("gpt-4o", "openai"))
            .expect("submit")
            .wait()
            .expect("wait");
        assert_eq!(outcome.phase, Phase::Completed);

        let status = coord.current_status();
        assert_eq!(status.phase, Phase::Completed);
        assert_eq!(status.completed_count, 3);
        assert_eq!(status.current_test_name, None);
        assert!(status.ended_at.is_some());
        assert!(status.started_at <= status.ended_at);
    }
}
