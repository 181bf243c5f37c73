//! Shared test utilities for docsync integration tests.
//!
//! This module provides:
//! - `TestHarness`: an engine over an in-memory repository and database
//! - Builders for webhook push payloads

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
