//! Results storage and retrieval
//!
//! Provides persistent storage for run results in JSON format.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::RunSummary;
use crate::output::csv_record;

/// A stored run against one image
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRun {
    /// Unique run ID
    pub id: String,

    /// Image under test
    pub image: String,

    /// Timestamp when the run started
    pub started_at: DateTime<Utc>,

    /// Timestamp when the run completed
    pub completed_at: DateTime<Utc>,

    /// Whether cases ran in parallel
    pub parallel: bool,

    /// Concurrency level
    pub concurrency: usize,

    pub summary: RunSummary,

    pub environment: EnvironmentInfo,
}

/// Environment information
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Operating system
    pub os: String,

    /// Architecture
    pub arch: String,

    /// Tool version
    pub tool_version: String,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl StoredRun {
    /// Wrap a finished summary; `started_at` is when the run began
    pub fn new(summary: RunSummary, started_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_run_id(),
            image: summary.image.clone(),
            started_at,
            completed_at: Utc::now(),
            parallel: false,
            concurrency: 1,
            summary,
            environment: EnvironmentInfo::default(),
        }
    }

    pub fn with_concurrency(mut self, parallel: bool, concurrency: usize) -> Self {
        self.parallel = parallel;
        self.concurrency = if parallel { concurrency } else { 1 };
        self
    }

    fn info(&self) -> RunInfo {
        RunInfo {
            id: self.id.clone(),
            image: self.image.clone(),
            started_at: self.started_at,
            total: self.summary.total,
            passed: self.summary.passed,
            failed: self.summary.failed + self.summary.errors,
            pass_rate: self.summary.pass_rate(),
        }
    }
}

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// Results storage manager
pub struct ResultsStorage {
    /// Base directory for results
    base_dir: PathBuf,
}

impl ResultsStorage {
    /// Create a new results storage
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Storage under the user data directory
    pub fn default_dir() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dlc-ec2-tests")
            .join("results");
        Self::new(base_dir)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get path for a specific run
    fn run_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{run_id}.json"))
    }

    /// Save a run
    pub fn save(&self, run: &StoredRun) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("Failed to create results directory: {}", self.base_dir.display())
        })?;

        let path = self.run_path(&run.id);
        let file = File::create(&path).context("Failed to create results file")?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, run).context("Failed to write results")?;

        info!("Saved run results to {}", path.display());
        Ok(path)
    }

    /// Load a run by id
    pub fn load(&self, run_id: &str) -> Result<StoredRun> {
        let path = self.run_path(run_id);
        let run = self
            .load_from_path(&path)
            .with_context(|| format!("Failed to load run {run_id}"))?;
        debug!("Loaded run results from {}", path.display());
        Ok(run)
    }

    /// Load from a specific path
    pub fn load_from_path(&self, path: &Path) -> Result<StoredRun> {
        let file = File::open(path).context("Failed to open results file")?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context("Failed to parse results")
    }

    /// All stored runs whose image contains `filter`, newest first
    pub fn load_all(&self, filter: Option<&str>) -> Result<Vec<StoredRun>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if !path.extension().map(|e| e == "json").unwrap_or(false) {
                continue;
            }

            match self.load_from_path(&path) {
                Ok(run) if filter.map_or(true, |f| run.image.contains(f)) => runs.push(run),
                Ok(_) => {}
                Err(e) => debug!("Failed to load {}: {}", path.display(), e),
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// Brief information on stored runs, newest first
    pub fn list_runs(&self, filter: Option<&str>) -> Result<Vec<RunInfo>> {
        Ok(self.load_all(filter)?.iter().map(StoredRun::info).collect())
    }

    /// Most recent run matching `filter`
    pub fn latest(&self, filter: Option<&str>) -> Result<Option<StoredRun>> {
        Ok(self.load_all(filter)?.into_iter().next())
    }

    /// Delete a run
    pub fn delete(&self, run_id: &str) -> Result<()> {
        let path = self.run_path(run_id);
        if path.exists() {
            fs::remove_file(&path)?;
            info!("Deleted results: {}", path.display());
        }
        Ok(())
    }

    /// Export run to a file
    pub fn export(&self, run: &StoredRun, path: &Path, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => {
                let file = File::create(path)?;
                let writer = BufWriter::new(file);
                serde_json::to_writer_pretty(writer, run)?;
            }
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)?;

                writer.write_record([
                    "run_id",
                    "image",
                    "case",
                    "instance_type",
                    "status",
                    "duration_ms",
                    "message",
                ])?;

                for result in &run.summary.results {
                    let [case, instance_type, status, duration_ms, message] = csv_record(result);
                    writer.write_record([
                        run.id.clone(),
                        run.image.clone(),
                        case,
                        instance_type,
                        status,
                        duration_ms,
                        message,
                    ])?;
                }
                writer.flush()?;
            }
        }

        info!("Exported results to {}", path.display());
        Ok(())
    }
}

/// Brief run information
#[derive(Clone, Debug)]
pub struct RunInfo {
    pub id: String,
    pub image: String,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    /// Failed plus errored cases
    pub failed: usize,
    pub pass_rate: f64,
}

/// Export format
#[derive(Clone, Copy, Debug)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CollectedCase, TestResult};
    use crate::scenarios;
    use chrono::Duration;
    use tempfile::tempdir;

    fn summary(image: &str) -> RunSummary {
        let case = CollectedCase::new(
            scenarios::find("test_pytorch_standalone_cpu").unwrap(),
            "c5.9xlarge",
        );
        RunSummary::new(
            image,
            vec![
                TestResult::pass(&case, 100),
                TestResult::fail(&case, 50, "exit 1"),
            ],
        )
    }

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id();
        assert_eq!(id.len(), "20250101_000000_0000".len());
        assert!(id.chars().all(|c| c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn test_stored_run() {
        let run = StoredRun::new(summary("pytorch-training:1.8.1-cpu-py36"), Utc::now())
            .with_concurrency(true, 8);
        assert_eq!(run.image, "pytorch-training:1.8.1-cpu-py36");
        assert!(run.parallel);
        assert_eq!(run.concurrency, 8);
        assert!(run.completed_at >= run.started_at);

        let sequential = StoredRun::new(summary("x"), Utc::now()).with_concurrency(false, 8);
        assert_eq!(sequential.concurrency, 1);
    }

    #[test]
    fn test_save_load_and_list() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());

        let older = StoredRun::new(
            summary("pytorch-training:1.8.1-cpu-py36"),
            Utc::now() - Duration::hours(1),
        );
        let newer = StoredRun::new(summary("pytorch-training:1.9.0-gpu-py38"), Utc::now());
        storage.save(&older).unwrap();
        storage.save(&newer).unwrap();

        let loaded = storage.load(&older.id).unwrap();
        assert_eq!(loaded.summary.total, 2);

        let runs = storage.list_runs(None).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, newer.id);
        assert_eq!(runs[1].failed, 1);

        let filtered = storage.list_runs(Some("1.8.1")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].image, "pytorch-training:1.8.1-cpu-py36");

        assert_eq!(storage.latest(None).unwrap().unwrap().id, newer.id);

        storage.delete(&newer.id).unwrap();
        assert_eq!(storage.list_runs(None).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_dir_lists_nothing() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path().join("absent"));
        assert!(storage.list_runs(None).unwrap().is_empty());
        assert!(storage.load("nope").is_err());
    }

    #[test]
    fn test_export_csv() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());
        let run = StoredRun::new(summary("pytorch-training:1.8.1-cpu-py36"), Utc::now());

        let path = dir.path().join("export.csv");
        storage
            .export(&run, &path, ExportFormat::from_extension(&path).unwrap())
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("run_id,image,case"));
        assert!(lines[2].ends_with("FAIL,50,exit 1"));
    }

    #[test]
    fn test_export_format() {
        assert!(matches!(
            ExportFormat::from_str("json"),
            Some(ExportFormat::Json)
        ));
        assert!(matches!(
            ExportFormat::from_str("CSV"),
            Some(ExportFormat::Csv)
        ));
        assert!(ExportFormat::from_str("unknown").is_none());
    }
}
