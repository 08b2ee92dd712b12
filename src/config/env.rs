//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use crate::catalog::Processor;

/// Environment variable prefix
const ENV_PREFIX: &str = "DLC_EC2";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Config file from DLC_EC2_CONFIG
    pub config_file: Option<String>,
    /// Image under test from DLC_EC2_IMAGE
    pub image: Option<String>,
    /// Region from DLC_EC2_REGION
    pub region: Option<String>,
    /// Default host from DLC_EC2_HOST
    pub host: Option<String>,
    /// Timeout from DLC_EC2_TIMEOUT
    pub timeout: Option<u64>,
    /// Parallel from DLC_EC2_PARALLEL
    pub parallel: Option<bool>,
    /// Output format from DLC_EC2_FORMAT
    pub format: Option<String>,
    /// GPU instance types from EC2_GPU_INSTANCE_TYPE
    pub gpu_instance_types: Option<String>,
    /// CPU instance types from EC2_CPU_INSTANCE_TYPE
    pub cpu_instance_types: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            config_file: get_env("CONFIG"),
            image: get_env("IMAGE"),
            region: get_env("REGION"),
            host: get_env("HOST"),
            timeout: get_env_parse("TIMEOUT"),
            parallel: get_env_bool("PARALLEL"),
            format: get_env("FORMAT"),
            gpu_instance_types: env::var(Processor::Gpu.override_env_var()).ok(),
            cpu_instance_types: env::var(Processor::Cpu.override_env_var()).ok(),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.config_file.is_some()
            || self.image.is_some()
            || self.region.is_some()
            || self.host.is_some()
            || self.timeout.is_some()
            || self.parallel.is_some()
            || self.format.is_some()
            || self.gpu_instance_types.is_some()
            || self.cpu_instance_types.is_some()
    }

    /// Comma-separated instance-type override for a processor kind
    ///
    /// `None` when the variable is unset or lists nothing.
    pub fn instance_types(&self, processor: Processor) -> Option<Vec<String>> {
        let raw = match processor {
            Processor::Gpu => self.gpu_instance_types.as_deref(),
            Processor::Cpu => self.cpu_instance_types.as_deref(),
        }?;

        let list: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        if list.is_empty() {
            None
        } else {
            Some(list)
        }
    }

    /// Get format with fallback
    pub fn format_or(&self, default: &str) -> String {
        self.format.clone().unwrap_or_else(|| default.to_string())
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_CONFIG:      {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_IMAGE:       {:?}", ENV_PREFIX, self.image);
        println!("  {}_REGION:      {:?}", ENV_PREFIX, self.region);
        println!("  {}_HOST:        {:?}", ENV_PREFIX, self.host);
        println!("  {}_TIMEOUT:     {:?}", ENV_PREFIX, self.timeout);
        println!("  {}_PARALLEL:    {:?}", ENV_PREFIX, self.parallel);
        println!("  {}_FORMAT:      {:?}", ENV_PREFIX, self.format);
        println!("  EC2_GPU_INSTANCE_TYPE: {:?}", self.gpu_instance_types);
        println!("  EC2_CPU_INSTANCE_TYPE: {:?}", self.cpu_instance_types);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print all recognised environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG        Path to configuration file");
    println!("  {ENV_PREFIX}_IMAGE         Image URI under test");
    println!("  {ENV_PREFIX}_REGION        AWS region for registry login");
    println!("  {ENV_PREFIX}_HOST          Default test host");
    println!("  {ENV_PREFIX}_TIMEOUT       Per-case command timeout in seconds");
    println!("  {ENV_PREFIX}_PARALLEL      Enable parallel execution (true/false)");
    println!("  {ENV_PREFIX}_FORMAT        Output format (table, json, csv, summary)");
    println!("  EC2_GPU_INSTANCE_TYPE  Comma-separated GPU instance types");
    println!("  EC2_CPU_INSTANCE_TYPE  Comma-separated CPU instance types");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_HOST=10.0.0.10");
    println!("  export EC2_GPU_INSTANCE_TYPE=p3.2xlarge,p3.8xlarge");
    println!("  dlc-ec2-tests run --image pytorch-training:1.8.1-gpu-py36-cu111-ubuntu18.04");
}
