//! Shared test utilities for scale-ingest integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a store, an in-memory mailbox and a worker
//! - `CsvBuilder` for producing scale export files programmatically

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
