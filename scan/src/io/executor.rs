//! Executor backed by an external probe command.
//!
//! The probe is spawned once per test case. It receives a JSON
//! [`ProbeRequest`] on stdin and reports back through its exit code:
//!
//! - [`exit_codes::OK`]: stdout holds a JSON [`TestResult`].
//! - [`exit_codes::UPSTREAM`]: the target could not be reached; stderr explains why.
//! - anything else: the test case could not be evaluated; stderr explains why.
//!
//! Provider credentials (`OPENAI_API_KEY`, …) reach the probe through the
//! inherited environment.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::batch::ResolvedTarget;
use crate::core::types::{TestCaseDefinition, TestResult};
use crate::executor::{Executor, ExecutorError};
use crate::exit_codes;
use crate::io::config::ScanConfig;
use crate::io::process::run_with_deadline;

/// Payload written to the probe's stdin.
#[derive(Debug, Serialize)]
pub struct ProbeRequest<'a> {
    pub test_case: &'a TestCaseDefinition,
    pub target: &'a ResolvedTarget,
    pub iterations: u32,
}

/// Executor that runs the configured probe command.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
    workdir: Option<PathBuf>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandExecutor {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            workdir: None,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &ScanConfig) -> Self {
        Self::new(
            cfg.probe.command.clone(),
            cfg.probe_timeout(),
            cfg.probe.output_limit_bytes,
        )
    }

    /// Run the probe from `dir` instead of the current directory.
    pub fn with_workdir(mut self, dir: PathBuf) -> Self {
        self.workdir = Some(dir);
        self
    }

    fn build_command(&self) -> Result<Command, ExecutorError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ExecutorError::Upstream {
                message: "probe command is empty".to_string(),
            })?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(test = %case.name, iterations))]
    fn run(
        &self,
        case: &TestCaseDefinition,
        target: &ResolvedTarget,
        iterations: u32,
    ) -> Result<TestResult, ExecutorError> {
        let request = ProbeRequest {
            test_case: case,
            target,
            iterations,
        };
        let payload =
            serde_json::to_vec(&request).map_err(|err| ExecutorError::InvalidTestCase {
                message: format!("serialize probe request: {err}"),
            })?;

        let cmd = self.build_command()?;
        // Failing to launch the probe means no test case can reach the target.
        let output = run_with_deadline(cmd, payload, self.timeout, self.output_limit_bytes)
            .map_err(|err| ExecutorError::Upstream {
                message: format!("run probe: {err:#}"),
            })?;

        if output.timed_out {
            return Err(ExecutorError::Timeout {
                millis: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            });
        }

        match output.status.code() {
            Some(exit_codes::OK) => {
                let result: TestResult = serde_json::from_slice(&output.stdout).map_err(|err| {
                    ExecutorError::InvalidTestCase {
                        message: format!("parse probe output: {err}"),
                    }
                })?;
                debug!(passed = result.passed, "probe finished");
                Ok(result)
            }
            Some(exit_codes::UPSTREAM) => {
                let message = output.stderr_summary();
                warn!(error = %message, "probe reported upstream failure");
                Err(ExecutorError::Upstream { message })
            }
            code => {
                warn!(exit_code = ?code, "probe could not evaluate test case");
                Err(ExecutorError::InvalidTestCase {
                    message: output.stderr_summary(),
                })
            }
        }
    }
}
