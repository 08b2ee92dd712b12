//! Output formatters for test results
//!
//! Provides table, JSON, CSV and one-line summary output.

use std::io::Write;

use crate::models::{RunSummary, TestResult, TestStatus};

const CSV_HEADER: [&str; 5] = ["case", "instance_type", "status", "duration_ms", "message"];

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn status_label(&self, status: TestStatus) -> &'static str {
        if self.colorize {
            match status {
                TestStatus::Pass => "\x1b[32m✓ PASS \x1b[0m",
                TestStatus::Fail => "\x1b[31m✗ FAIL \x1b[0m",
                TestStatus::Skip => "\x1b[33m○ SKIP \x1b[0m",
                TestStatus::Error => "\x1b[31m! ERROR\x1b[0m",
            }
        } else {
            match status {
                TestStatus::Pass => "✓ PASS ",
                TestStatus::Fail => "✗ FAIL ",
                TestStatus::Skip => "○ SKIP ",
                TestStatus::Error => "! ERROR",
            }
        }
    }

    fn format_result_table(&self, result: &TestResult) -> String {
        let mut line = format!(
            "{:52} {} [{:>8}ms]",
            result.case_id(),
            self.status_label(result.status),
            result.duration_ms
        );
        if let Some(message) = &result.message {
            line.push_str("\n      ");
            line.push_str(message);
        }
        line
    }

    /// Format a run summary
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Csv => csv_lines(summary.results.iter(), true),
            OutputFormat::Summary => self.format_summary_brief(summary),
        }
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n══════════════════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(" Image: {}\n", summary.image));
        output.push_str("══════════════════════════════════════════════════════════════════════════\n");

        for result in &summary.results {
            output.push_str(&format!("  {}\n", self.format_result_table(result)));
        }

        output.push_str("──────────────────────────────────────────────────────────────────────────\n");

        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", summary.passed)
        } else {
            summary.passed.to_string()
        };
        let fail_str = if self.colorize && summary.failed + summary.errors > 0 {
            format!("\x1b[31m{}\x1b[0m", summary.failed)
        } else {
            summary.failed.to_string()
        };

        output.push_str(&format!(
            "  Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {}\n",
            summary.total, pass_str, fail_str, summary.skipped, summary.errors
        ));
        output.push_str(&format!(
            "  Pass Rate: {:.1}% | Duration: {}ms\n",
            summary.pass_rate(),
            summary.total_duration_ms
        ));

        output
    }

    fn format_summary_brief(&self, summary: &RunSummary) -> String {
        format!(
            "{}: {}/{} passed, {} skipped, {} failed, {} errors ({:.1}%) in {}ms",
            summary.image,
            summary.passed,
            summary.total,
            summary.skipped,
            summary.failed,
            summary.errors,
            summary.pass_rate(),
            summary.total_duration_ms
        )
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Results as CSV rows, optionally preceded by the header
fn csv_lines<'a>(results: impl Iterator<Item = &'a TestResult>, header: bool) -> String {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if header {
        let _ = writer.write_record(CSV_HEADER);
    }
    for result in results {
        let _ = writer.write_record(csv_record(result));
    }
    let bytes = writer.into_inner().unwrap_or_default();
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}

pub(crate) fn csv_record(result: &TestResult) -> [String; 5] {
    [
        result.scenario.clone(),
        result.instance_type.clone(),
        result.status.to_string(),
        result.duration_ms.to_string(),
        result.message.clone().unwrap_or_default(),
    ]
}

/// Write a run summary to a file
pub fn write_summary_to_file(
    path: &str,
    summary: &RunSummary,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_summary(summary);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;
    file.write_all(b"\n")?;

    Ok(())
}
