//! Test result models
//!
//! Defines per-case outcomes and run summaries.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::scenario::CollectedCase;

/// Terminal outcome of a test case
///
/// `Error` marks a case whose collection or preconditions failed on
/// configuration, so it never reached a pass/fail decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✓",
            TestStatus::Fail => "✗",
            TestStatus::Skip => "○",
            TestStatus::Error => "!",
        }
    }

    /// Whether this outcome should fail the overall run
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Fail | TestStatus::Error)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "PASS"),
            TestStatus::Fail => write!(f, "FAIL"),
            TestStatus::Skip => write!(f, "SKIP"),
            TestStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of a single test case
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub scenario: String,
    pub instance_type: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub message: Option<String>,
}

impl TestResult {
    fn new(
        scenario: impl Into<String>,
        instance_type: impl Into<String>,
        status: TestStatus,
    ) -> Self {
        Self {
            scenario: scenario.into(),
            instance_type: instance_type.into(),
            status,
            duration_ms: 0,
            message: None,
        }
    }

    pub fn pass(case: &CollectedCase, duration_ms: u64) -> Self {
        Self {
            duration_ms,
            ..Self::new(case.scenario.name, &case.instance_type, TestStatus::Pass)
        }
    }

    pub fn fail(case: &CollectedCase, duration_ms: u64, message: impl Into<String>) -> Self {
        Self {
            duration_ms,
            message: Some(message.into()),
            ..Self::new(case.scenario.name, &case.instance_type, TestStatus::Fail)
        }
    }

    pub fn skip(case: &CollectedCase, reason: impl Into<String>) -> Self {
        Self::new(case.scenario.name, &case.instance_type, TestStatus::Skip).with_message(reason)
    }

    pub fn error(case: &CollectedCase, error: impl Into<String>) -> Self {
        Self::new(case.scenario.name, &case.instance_type, TestStatus::Error).with_message(error)
    }

    /// Error for a scenario that could not be collected at all
    pub fn collection_error(scenario: &str, error: impl Into<String>) -> Self {
        Self::new(scenario, "-", TestStatus::Error).with_message(error)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Case identifier, `name[instance_type]`
    pub fn case_id(&self) -> String {
        format!("{}[{}]", self.scenario, self.instance_type)
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.case_id(),
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Summary of one run against an image
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub image: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total_duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl RunSummary {
    pub fn new(image: impl Into<String>, results: Vec<TestResult>) -> Self {
        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();

        Self {
            image: image.into(),
            total: results.len(),
            passed: count(TestStatus::Pass),
            failed: count(TestStatus::Fail),
            skipped: count(TestStatus::Skip),
            errors: count(TestStatus::Error),
            total_duration_ms: results.iter().map(|r| r.duration_ms).sum(),
            results,
        }
    }

    /// Pass rate over cases that were not skipped
    pub fn pass_rate(&self) -> f64 {
        let executed = self.total - self.skipped;
        if executed == 0 {
            0.0
        } else {
            (self.passed as f64 / executed as f64) * 100.0
        }
    }

    pub fn is_success(&self) -> bool {
        !self.results.iter().any(|r| r.status.is_failure())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image: {}", self.image)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {}",
            self.total, self.passed, self.failed, self.skipped, self.errors
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios;

    fn case(name: &str, instance_type: &str) -> CollectedCase {
        CollectedCase::new(scenarios::find(name).unwrap(), instance_type)
    }

    #[test]
    fn test_result_creation() {
        let result = TestResult::pass(&case("test_pytorch_standalone_cpu", "c5.9xlarge"), 100);
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(result.duration_ms, 100);
        assert_eq!(result.case_id(), "test_pytorch_standalone_cpu[c5.9xlarge]");
    }

    #[test]
    fn test_skip_carries_reason() {
        let result = TestResult::skip(&case("test_pytorch_amp", "g3.8xlarge"), "too old");
        assert_eq!(result.status, TestStatus::Skip);
        assert_eq!(result.duration_ms, 0);
        assert_eq!(result.message.as_deref(), Some("too old"));
    }

    #[test]
    fn test_run_summary() {
        let results = vec![
            TestResult::pass(&case("test_pytorch_standalone_cpu", "c5.9xlarge"), 100),
            TestResult::fail(&case("test_pytorch_train_mnist_cpu", "c5.9xlarge"), 50, "exit 1"),
            TestResult::skip(&case("test_pytorch_amp", "g3.8xlarge"), "too old"),
            TestResult::collection_error("test_nvapex", "unknown instance type"),
        ];

        let summary = RunSummary::new("pytorch-training:1.5.1-cpu-py3", results);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.total_duration_ms, 150);
        assert!(!summary.is_success());
        assert!((summary.pass_rate() - 100.0 / 3.0).abs() < 1e-9);
    }
}
