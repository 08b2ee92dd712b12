//! Results storage module
//!
//! Persists run summaries so earlier runs can be listed and exported.

mod storage;

pub use storage::{ExportFormat, ResultsStorage, StoredRun};
