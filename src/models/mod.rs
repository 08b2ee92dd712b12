//! Data models for DLC integration testing
//!
//! This module contains the data structures shared across the application.

mod image;
mod scenario;
mod test_result;
mod version;

pub use image::{Framework, ImageError, ImageReference};
pub use scenario::{CollectedCase, CommandPath, Gate, Markers, Scenario, CONTAINER_TESTS_PREFIX};
pub use test_result::{RunSummary, TestResult, TestStatus};
pub use version::{FrameworkVersion, VersionError};
