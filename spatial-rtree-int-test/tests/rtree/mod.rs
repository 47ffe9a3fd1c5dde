//! R-Tree index integration tests.
//!
//! These tests drive the index through its public API on top of a
//! file-backed block store.

mod concurrency_test;
mod maintenance_test;
mod persistence_test;
mod scan_test;
