//! Workload collector daemon internals
//!
//! Exposed as a library so the HTTP endpoints and configuration can be
//! exercised from integration tests.

pub mod api;
pub mod config;
