//! Security test-run orchestration engine.
//!
//! A batch is a selection of named test cases run one after another against a
//! target model. The crate keeps the same split throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (batch config validation, case
//!   selection, outcome classification). No I/O, fully testable in isolation.
//! - **[`coordinator`]**: The single owner of the run state. Accepts batches,
//!   runs them on a dedicated thread and publishes [`events`] to a sink.
//! - **[`executor`]**: The seam through which a single test case is run.
//! - **[`io`]**: Side-effecting operations (config, rule discovery, probe
//!   processes, reports). Isolated to enable fakes in tests.

pub mod coordinator;
pub mod core;
pub mod events;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
