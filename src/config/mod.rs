//! Configuration module
//!
//! Handles loading and managing configuration, and turns it into the
//! selector, compatibility rules, connection provider and dispatcher a run
//! needs.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::{
    IncompatibilityRule, InstanceCatalog, InstanceTypeSelector, Processor, RuleBasedCompatibility,
};
use crate::executor::{default_external_gates, ExternalGates};
use crate::models::CONTAINER_TESTS_PREFIX;
use crate::remote::{DispatchOptions, Executable, SshConfig, SshConnectionProvider};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Version of config file format
    pub version: String,

    /// AWS region for registry login
    pub region: String,

    /// Directory holding the test scripts inside the container
    pub container_tests_prefix: String,

    /// Per-case command timeout in seconds
    pub timeout_secs: u64,

    /// Enable parallel execution by default
    pub parallel: bool,

    /// Maximum concurrent cases
    pub max_concurrent: usize,

    /// Host used for instance types without an entry in `hosts`
    pub default_host: Option<String>,

    /// Reachable host per instance type
    pub hosts: BTreeMap<String, String>,

    pub ssh: SshSettings,

    pub container: ContainerSettings,

    /// Instance-type override lists
    pub instance_types: InstanceTypeOverrides,

    /// Extra instance shapes and their GPU counts
    pub catalog: BTreeMap<String, u32>,

    /// Incompatibility rules on top of the built-in ones
    pub incompatibilities: Vec<IncompatibilityRule>,

    /// Thresholds for externally supplied gates
    pub external_gates: ExternalGates,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            region: "us-west-2".to_string(),
            container_tests_prefix: CONTAINER_TESTS_PREFIX.to_string(),
            timeout_secs: 3000,
            parallel: false,
            max_concurrent: 4,
            default_host: None,
            hosts: BTreeMap::new(),
            ssh: SshSettings::default(),
            container: ContainerSettings::default(),
            instance_types: InstanceTypeOverrides::default(),
            catalog: BTreeMap::new(),
            incompatibilities: Vec::new(),
            external_gates: default_external_gates(),
        }
    }
}

/// SSH settings for test hosts
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub username: String,

    /// Private key path, `~` is expanded
    pub key_path: Option<String>,

    pub port: u16,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// How long to wait for a host to accept SSH, in seconds
    pub wait_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            username: "ec2-user".to_string(),
            key_path: None,
            port: 22,
            connect_timeout_secs: 30,
            wait_secs: 120,
        }
    }
}

/// Container launch settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Host directory mounted at `/test`
    pub host_tests_dir: String,
    pub executable: Executable,
    pub large_shm: bool,
    pub host_network: bool,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            host_tests_dir: "$HOME/container_tests".to_string(),
            executable: Executable::Bash,
            large_shm: false,
            host_network: false,
        }
    }
}

/// Instance types to parametrize over, per processor kind
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceTypeOverrides {
    pub gpu: Vec<String>,
    pub cpu: Vec<String>,
}

impl AppConfig {
    /// Apply environment overrides
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(region) = &env.region {
            self.region = region.clone();
        }
        if let Some(host) = &env.host {
            self.default_host = Some(host.clone());
        }
        if let Some(timeout) = env.timeout {
            self.timeout_secs = timeout;
        }
        if let Some(parallel) = env.parallel {
            self.parallel = parallel;
        }
        if let Some(gpu) = env.instance_types(Processor::Gpu) {
            self.instance_types.gpu = gpu;
        }
        if let Some(cpu) = env.instance_types(Processor::Cpu) {
            self.instance_types.cpu = cpu;
        }
    }

    pub fn instance_catalog(&self) -> InstanceCatalog {
        InstanceCatalog::new().with_shapes(&self.catalog)
    }

    pub fn selector(&self) -> InstanceTypeSelector {
        InstanceTypeSelector::new(self.instance_catalog())
            .with_override(Processor::Gpu, self.instance_types.gpu.iter().cloned())
            .with_override(Processor::Cpu, self.instance_types.cpu.iter().cloned())
    }

    pub fn compatibility(&self) -> RuleBasedCompatibility {
        RuleBasedCompatibility::with_defaults(self.incompatibilities.iter().cloned())
    }

    pub fn ssh_config(&self) -> SshConfig {
        let mut config = SshConfig::new(&self.ssh.username)
            .port(self.ssh.port)
            .timeout(self.ssh.connect_timeout_secs)
            .wait(self.ssh.wait_secs);
        if let Some(key) = &self.ssh.key_path {
            config = config.private_key(file::expand_path(key));
        }
        config
    }

    pub fn connection_provider(&self) -> SshConnectionProvider {
        let mut provider = SshConnectionProvider::new(self.ssh_config());
        for (instance_type, host) in &self.hosts {
            provider = provider.with_host(instance_type, host);
        }
        if let Some(host) = &self.default_host {
            provider = provider.with_default_host(host);
        }
        provider
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            region: self.region.clone(),
            executable: self.container.executable,
            large_shm: self.container.large_shm,
            host_network: self.container.host_network,
            timeout_secs: self.timeout_secs,
            host_tests_dir: self.container.host_tests_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CompatibilityCheck, InstancePool};
    use crate::models::ImageReference;
    use crate::remote::ConnectionProvider;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.container_tests_prefix, "/test/bin");
        assert_eq!(config.max_concurrent, 4);
        assert!(config.external_gates.contains_key("pt15_and_above_only"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str(
            "region: eu-west-1\ninstance_types:\n  gpu: [p3.8xlarge]\n",
        )
        .unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.timeout_secs, 3000);
        assert_eq!(config.instance_types.gpu, vec!["p3.8xlarge"]);
        assert!(config.instance_types.cpu.is_empty());
        assert_eq!(config.ssh.username, "ec2-user");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        let env = EnvConfig {
            region: Some("us-east-1".to_string()),
            host: Some("10.1.2.3".to_string()),
            timeout: Some(60),
            gpu_instance_types: Some("p3.2xlarge, p3.8xlarge".to_string()),
            ..Default::default()
        };
        config.apply_env(&env);

        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.default_host.as_deref(), Some("10.1.2.3"));
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.instance_types.gpu, vec!["p3.2xlarge", "p3.8xlarge"]);
        assert_eq!(config.dispatch_options().timeout_secs, 60);
    }

    #[test]
    fn test_selector_from_config() {
        let mut config = AppConfig::default();
        config.catalog.insert("p9.huge".to_string(), 4);
        config.instance_types.gpu = vec!["p9.huge".to_string(), "p3.2xlarge".to_string()];

        let selector = config.selector();
        assert_eq!(
            selector.select_pool(InstancePool::MultiGpu).unwrap(),
            vec!["p9.huge"]
        );
        assert_eq!(
            selector.select_pool(InstancePool::Cpu).unwrap(),
            vec!["c5.9xlarge"]
        );
    }

    #[test]
    fn test_compatibility_includes_configured_rules() {
        let mut config = AppConfig::default();
        config.incompatibilities.push(
            IncompatibilityRule::new("no g5 for cpu images")
                .on_instances(["g5.xlarge"])
                .processor(Processor::Cpu),
        );

        let compat = config.compatibility();
        let image = ImageReference::parse("pytorch-training:1.8.1-cpu-py36").unwrap();
        assert!(compat.is_incompatible(&image, "g5.xlarge"));
        assert!(!compat.is_incompatible(&image, "c5.9xlarge"));
    }

    #[test]
    fn test_connection_provider_hosts() {
        let mut config = AppConfig::default();
        config
            .hosts
            .insert("p3.8xlarge".to_string(), "10.0.0.8".to_string());

        let provider = config.connection_provider();
        assert_eq!(provider.resolve_host("p3.8xlarge"), Ok("10.0.0.8"));
        assert!(tokio_test::block_on(provider.connect("c5.9xlarge")).is_err());
    }
}
