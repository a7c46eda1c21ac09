//! JSON batch reports written when a batch reaches a terminal event.
//!
//! Reports are the persisted product output of a batch; tracing output is
//! diagnostics only.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::types::{BatchError, Phase, RecordedResult};
use crate::events::{BatchEvent, EventSink};

/// Persisted summary of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// Terminal phase the batch ended in.
    pub outcome: Phase,
    /// Number of test cases selected for the batch.
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<RecordedResult>,
    pub error: Option<BatchError>,
}

enum Destination {
    /// `<dir>/<batch_id>.json`
    Dir(PathBuf),
    File(PathBuf),
}

/// Sink that writes a [`BatchReport`] on every terminal event.
///
/// Write failures are logged and otherwise ignored.
pub struct ReportSink {
    destination: Destination,
    started: Mutex<Option<(Uuid, usize, DateTime<Utc>)>>,
}

impl ReportSink {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::with_destination(Destination::Dir(dir.into()))
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self::with_destination(Destination::File(path.into()))
    }

    fn with_destination(destination: Destination) -> Self {
        Self {
            destination,
            started: Mutex::new(None),
        }
    }

    fn path_for(&self, batch_id: Uuid) -> PathBuf {
        match &self.destination {
            Destination::Dir(dir) => dir.join(format!("{batch_id}.json")),
            Destination::File(path) => path.clone(),
        }
    }

    fn build_report(&self, event: &BatchEvent) -> Option<BatchReport> {
        let (outcome, results, error) = match event {
            BatchEvent::BatchCompleted { results, .. } => (Phase::Completed, results, None),
            BatchEvent::BatchStopped {
                partial_results, ..
            } => (Phase::Stopped, partial_results, None),
            BatchEvent::BatchFailed {
                partial_results,
                error,
                ..
            } => (Phase::Failed, partial_results, Some(error.clone())),
            _ => return None,
        };
        let batch_id = event.batch_id();
        let (total, started_at) = match self.started.lock().take() {
            Some((id, total, at)) if id == batch_id => (total, Some(at)),
            _ => (results.len(), None),
        };
        let passed = results.iter().filter(|r| r.result.passed).count();
        Some(BatchReport {
            batch_id,
            outcome,
            total,
            passed,
            failed: results.len() - passed,
            started_at,
            finished_at: Utc::now(),
            results: results.clone(),
            error,
        })
    }
}

impl EventSink for ReportSink {
    fn emit(&self, event: &BatchEvent) {
        if let BatchEvent::BatchStarted { batch_id, total } = event {
            *self.started.lock() = Some((*batch_id, *total, Utc::now()));
            return;
        }
        let Some(report) = self.build_report(event) else {
            return;
        };
        let path = self.path_for(report.batch_id);
        match write_report(&path, &report) {
            Ok(()) => debug!(path = %path.display(), "batch report written"),
            Err(err) => warn!(path = %path.display(), error = %format!("{err:#}"), "failed to write batch report"),
        }
    }
}

/// Atomically write a report (temp file + rename).
pub fn write_report(path: &Path, report: &BatchReport) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(report).context("serialize report")?;
    buf.push('\n');
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestResult;
    use crate::test_support::policy_failure;

    fn load_report(path: &Path) -> BatchReport {
        let contents = fs::read_to_string(path).expect("read report");
        serde_json::from_str(&contents).expect("parse report")
    }

    fn recorded(name: &str, result: TestResult) -> RecordedResult {
        RecordedResult {
            name: name.to_string(),
            result,
        }
    }

    #[test]
    fn writes_report_into_dir_on_completion() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sink = ReportSink::in_dir(temp.path().join("reports"));
        let batch_id = Uuid::new_v4();

        sink.emit(&BatchEvent::BatchStarted { batch_id, total: 2 });
        sink.emit(&BatchEvent::BatchCompleted {
            batch_id,
            results: vec![
                recorded("a", TestResult::pass("refused", 3)),
                recorded("b", policy_failure("complied")),
            ],
        });

        let report = load_report(&temp.path().join("reports").join(format!("{batch_id}.json")));
        assert_eq!(report.outcome, Phase::Completed);
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert!(report.started_at.is_some());
        assert_eq!(report.results[1].name, "b");
    }

    #[test]
    fn failed_batch_report_carries_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out.json");
        let sink = ReportSink::to_file(&path);
        let batch_id = Uuid::new_v4();
        let error = BatchError {
            test_name: "b".to_string(),
            message: "connection refused".to_string(),
        };

        sink.emit(&BatchEvent::BatchStarted { batch_id, total: 3 });
        sink.emit(&BatchEvent::BatchFailed {
            batch_id,
            partial_results: vec![recorded("a", TestResult::pass("ok", 1))],
            error: error.clone(),
        });

        let report = load_report(&path);
        assert_eq!(report.outcome, Phase::Failed);
        assert_eq!(report.total, 3);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.error, Some(error));
    }

    #[test]
    fn non_terminal_events_write_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out.json");
        let sink = ReportSink::to_file(&path);
        sink.emit(&BatchEvent::TestStarted {
            batch_id: Uuid::nil(),
            name: "a".to_string(),
            index: 1,
            total: 1,
        });
        assert!(!path.exists());
    }
}
