//! Deterministic, pure logic shared by the scan coordinator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod batch;
pub mod catalog;
pub mod classifier;
pub mod selector;
pub mod types;
