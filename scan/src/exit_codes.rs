//! Stable exit codes for the `scan` CLI and the probe protocol.
//!
//! The same numbers mean the same thing on both sides: a probe exiting with
//! [`UPSTREAM`] is what ultimately makes `scan run` exit with [`UPSTREAM`].

/// `scan run`: batch completed. Probe: a result was written to stdout.
pub const OK: i32 = 0;
/// `scan`: invalid config, catalog or other host error. Probe: the test case could not be evaluated.
pub const INVALID: i32 = 1;
/// `scan run`: the batch was stopped before completion.
pub const STOPPED: i32 = 2;
/// `scan run`: the batch failed on an upstream error. Probe: the target could not be reached.
pub const UPSTREAM: i32 = 3;
