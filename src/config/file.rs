//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use super::AppConfig;
use crate::executor::{default_external_gates, ExternalGate};
use crate::scenarios::PT15_AND_ABOVE_ONLY;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./dlc-ec2-tests.yaml",
    "./.dlc-ec2-tests.yaml",
    "~/.config/dlc-ec2-tests/config.yaml",
];

const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

impl AppConfig {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from `path`, or from the first standard location, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path.map(Path::to_path_buf).or_else(Self::find) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            bail!("Unsupported config version: {}", self.version);
        }

        if !self.container_tests_prefix.starts_with('/') {
            bail!(
                "container_tests_prefix must be an absolute path, got '{}'",
                self.container_tests_prefix
            );
        }

        if self.max_concurrent == 0 {
            bail!("max_concurrent must be at least 1");
        }

        if self.timeout_secs == 0 {
            bail!("timeout_secs must be at least 1");
        }

        for (name, gate) in &self.external_gates {
            gate.threshold(name)?;
        }

        let catalog = self.instance_catalog();
        for instance_type in self
            .instance_types
            .gpu
            .iter()
            .chain(&self.instance_types.cpu)
            .chain(self.hosts.keys())
        {
            catalog
                .gpu_count(instance_type)
                .with_context(|| format!("Invalid instance type in config: {instance_type}"))?;
        }

        Ok(())
    }

    /// Example configuration written by `config init`
    pub fn example() -> Self {
        let mut config = Self {
            default_host: Some("10.0.0.10".to_string()),
            ..Self::default()
        };
        config
            .hosts
            .insert("p3.8xlarge".to_string(), "10.0.0.11".to_string());
        config.instance_types.gpu = vec!["p3.2xlarge".to_string(), "p3.8xlarge".to_string()];
        config.ssh.key_path = Some("~/.ssh/ec2-tests.pem".to_string());
        config.external_gates.insert(
            PT15_AND_ABOVE_ONLY.to_string(),
            ExternalGate::min_version("1.5").with_reason("Requires PyTorch 1.5 or above"),
        );
        config
    }
}

impl AppConfig {
    /// Reminders for gate thresholds that are defaults rather than
    /// operator decisions
    pub fn gate_notes(&self) -> Vec<String> {
        let defaults = default_external_gates();
        self.external_gates
            .iter()
            .filter(|(name, gate)| {
                defaults
                    .get(*name)
                    .is_some_and(|d| d.min_framework_version == gate.min_framework_version)
            })
            .map(|(name, gate)| {
                format!(
                    "external_gates.{name}.min_framework_version is the default {}; confirm it before relying on the gate",
                    gate.min_framework_version
                )
            })
            .collect()
    }
}

/// Expand ~ to home directory
pub(super) fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
