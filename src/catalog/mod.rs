//! EC2 instance catalog
//!
//! Classifies instance types by processor kind and GPU count, resolves the
//! instance pools scenarios are parametrized over, and decides which
//! image/instance combinations are known to be incompatible.

mod compat;
mod selector;

pub use compat::{CompatibilityCheck, IncompatibilityRule, RuleBasedCompatibility};
pub use selector::{InstancePool, InstanceTypeSelector};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Catalog and selection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown instance type: {0}")]
    UnknownInstanceType(String),

    #[error("Instance type {instance_type} is not a {expected} instance")]
    ProcessorMismatch {
        instance_type: String,
        expected: Processor,
    },
}

/// Processor kind of an image or an instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Processor {
    Cpu,
    Gpu,
}

impl Processor {
    pub fn name(&self) -> &'static str {
        match self {
            Processor::Cpu => "cpu",
            Processor::Gpu => "gpu",
        }
    }

    pub fn from_str(s: &str) -> Option<Processor> {
        match s.to_lowercase().as_str() {
            "cpu" => Some(Processor::Cpu),
            "gpu" => Some(Processor::Gpu),
            _ => None,
        }
    }

    /// Name of the override environment variable for this processor kind
    pub fn override_env_var(&self) -> &'static str {
        match self {
            Processor::Cpu => "EC2_CPU_INSTANCE_TYPE",
            Processor::Gpu => "EC2_GPU_INSTANCE_TYPE",
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name().to_uppercase())
    }
}

/// Known GPU shapes and their GPU counts
const GPU_SHAPES: &[(&str, u32)] = &[
    ("p2.xlarge", 1),
    ("p2.8xlarge", 8),
    ("p2.16xlarge", 16),
    ("p3.2xlarge", 1),
    ("p3.8xlarge", 4),
    ("p3.16xlarge", 8),
    ("p3dn.24xlarge", 8),
    ("p4d.24xlarge", 8),
    ("g3s.xlarge", 1),
    ("g3.4xlarge", 1),
    ("g3.8xlarge", 2),
    ("g3.16xlarge", 4),
    ("g4dn.xlarge", 1),
    ("g4dn.2xlarge", 1),
    ("g4dn.4xlarge", 1),
    ("g4dn.8xlarge", 1),
    ("g4dn.12xlarge", 4),
    ("g4dn.16xlarge", 1),
    ("g4dn.metal", 8),
    ("g5.xlarge", 1),
    ("g5.2xlarge", 1),
    ("g5.4xlarge", 1),
    ("g5.8xlarge", 1),
    ("g5.12xlarge", 4),
    ("g5.24xlarge", 4),
    ("g5.48xlarge", 8),
];

/// Instance families without accelerators
const CPU_FAMILIES: &[&str] = &[
    "c4", "c5", "c5a", "c5d", "c5n", "c6i", "m4", "m5", "m5a", "m5d", "m6i", "r5", "r5d", "t2",
    "t3",
];

/// Static catalog of EC2 instance shapes
#[derive(Clone, Debug, Default)]
pub struct InstanceCatalog {
    extra_gpu_shapes: BTreeMap<String, u32>,
}

impl InstanceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the catalog with additional shapes (`0` GPUs means CPU-only)
    pub fn with_shapes(mut self, shapes: &BTreeMap<String, u32>) -> Self {
        self.extra_gpu_shapes
            .extend(shapes.iter().map(|(k, v)| (k.clone(), *v)));
        self
    }

    /// Number of GPUs on an instance type, `0` for CPU-only types
    pub fn gpu_count(&self, instance_type: &str) -> Result<u32, CatalogError> {
        if let Some(count) = self.extra_gpu_shapes.get(instance_type) {
            return Ok(*count);
        }

        if let Some((_, count)) = GPU_SHAPES.iter().find(|(name, _)| *name == instance_type) {
            return Ok(*count);
        }

        if CPU_FAMILIES.contains(&family(instance_type)) {
            return Ok(0);
        }

        Err(CatalogError::UnknownInstanceType(instance_type.to_string()))
    }

    pub fn processor(&self, instance_type: &str) -> Result<Processor, CatalogError> {
        Ok(if self.gpu_count(instance_type)? > 0 {
            Processor::Gpu
        } else {
            Processor::Cpu
        })
    }
}

/// Instance family, e.g. `p3dn` for `p3dn.24xlarge`
pub fn family(instance_type: &str) -> &str {
    instance_type
        .split_once('.')
        .map(|(family, _)| family)
        .unwrap_or(instance_type)
}
