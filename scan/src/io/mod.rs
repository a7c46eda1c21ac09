//! Host-side I/O: configuration, rule discovery, the probe executor and reports.

pub mod catalog;
pub mod config;
pub mod executor;
pub mod process;
pub mod report;
