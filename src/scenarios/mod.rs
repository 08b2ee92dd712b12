//! PyTorch training scenarios
//!
//! Every scenario runs one script from the container test assets on an EC2
//! instance.
//!
//! ## Scenario groups
//!
//! ### Sanity / models (GPU and CPU variants)
//! - Standalone run
//! - MNIST training
//! - Linear regression
//! - DGL graph convolution (Python 3 only)
//!
//! ### Distributed backends (GPU)
//! - Horovod
//! - Gloo, NCCL, MPI (Python 3 only)
//!
//! ### Mixed precision and telemetry
//! - NVIDIA Apex
//! - Native AMP (PyTorch 1.6 and above, multi-GPU)
//! - DLC telemetry (single-GPU and CPU)

use std::collections::BTreeMap;
use tracing::debug;

use crate::catalog::{InstancePool, InstanceTypeSelector};
use crate::models::{CollectedCase, Gate, Markers, Scenario, TestResult};

const PYTORCH_TESTS: &str = "pytorch_tests";
const DGL_TESTS: &str = "dgl_tests";

const STANDALONE: &str = "testPyTorchStandalone";
const MNIST: &str = "testPyTorch";
const REGRESSION: &str = "testPyTorchRegression";
const DGL: &str = "testPyTorchDGL";
const HOROVOD: &str = "testPTHVD";
const GLOO: &str = "testPyTorchGloo";
const NCCL: &str = "testPyTorchNccl";
const MPI: &str = "testPyTorchMpi";
const APEX: &str = "testNVApex";
const AMP: &str = "testPyTorchAMP";
const TELEMETRY: &str = "test_pt_dlc_telemetry_test";

/// Gate name for the telemetry scenarios, resolved from configuration
pub const PT15_AND_ABOVE_ONLY: &str = "pt15_and_above_only";

const PY3_ONLY: &[Gate] = &[Gate::Py3Only];
const NATIVE_AMP: &[Gate] = &[Gate::MinFrameworkVersion {
    version: "1.6",
    reason: "Native AMP was introduced in PyTorch 1.6",
}];
const TELEMETRY_GATES: &[Gate] = &[Gate::External(PT15_AND_ABOVE_ONLY)];

const fn markers(integration: Option<&'static str>, model: &'static str) -> Markers {
    Markers { integration, model }
}

const fn gpu(
    name: &'static str,
    markers: Markers,
    gates: &'static [Gate],
    suite: &'static str,
    script: &'static str,
) -> Scenario {
    Scenario {
        name,
        markers,
        pool: InstancePool::Gpu,
        gates,
        suite,
        script,
        check_compatibility: true,
    }
}

const fn cpu(
    name: &'static str,
    markers: Markers,
    gates: &'static [Gate],
    suite: &'static str,
    script: &'static str,
) -> Scenario {
    Scenario {
        name,
        markers,
        pool: InstancePool::Cpu,
        gates,
        suite,
        script,
        check_compatibility: false,
    }
}

static SCENARIOS: &[Scenario] = &[
    gpu(
        "test_pytorch_standalone_gpu",
        markers(Some("pytorch_sanity_test"), "N/A"),
        &[],
        PYTORCH_TESTS,
        STANDALONE,
    ),
    cpu(
        "test_pytorch_standalone_cpu",
        markers(Some("pytorch_sanity_test"), "N/A"),
        &[],
        PYTORCH_TESTS,
        STANDALONE,
    ),
    gpu(
        "test_pytorch_train_mnist_gpu",
        markers(None, "mnist"),
        &[],
        PYTORCH_TESTS,
        MNIST,
    ),
    cpu(
        "test_pytorch_train_mnist_cpu",
        markers(None, "mnist"),
        &[],
        PYTORCH_TESTS,
        MNIST,
    ),
    gpu(
        "test_pytorch_linear_regression_gpu",
        markers(None, "linear_regression"),
        &[],
        PYTORCH_TESTS,
        REGRESSION,
    ),
    cpu(
        "test_pytorch_linear_regression_cpu",
        markers(None, "linear_regression"),
        &[],
        PYTORCH_TESTS,
        REGRESSION,
    ),
    gpu(
        "test_pytorch_train_dgl_gpu",
        markers(Some("dgl"), "gcn"),
        PY3_ONLY,
        DGL_TESTS,
        DGL,
    ),
    cpu(
        "test_pytorch_train_dgl_cpu",
        markers(Some("dgl"), "gcn"),
        PY3_ONLY,
        DGL_TESTS,
        DGL,
    ),
    gpu(
        "test_pytorch_with_horovod",
        markers(Some("horovod"), "mnist"),
        &[],
        PYTORCH_TESTS,
        HOROVOD,
    ),
    gpu(
        "test_pytorch_gloo",
        markers(Some("gloo"), "resnet18"),
        PY3_ONLY,
        PYTORCH_TESTS,
        GLOO,
    ),
    gpu(
        "test_pytorch_nccl",
        markers(Some("nccl"), "resnet18"),
        PY3_ONLY,
        PYTORCH_TESTS,
        NCCL,
    ),
    gpu(
        "test_pytorch_mpi",
        markers(Some("mpi"), "resnet18"),
        PY3_ONLY,
        PYTORCH_TESTS,
        MPI,
    ),
    gpu(
        "test_nvapex",
        markers(Some("nvidia_apex"), "N/A"),
        &[],
        PYTORCH_TESTS,
        APEX,
    ),
    Scenario {
        pool: InstancePool::MultiGpu,
        ..gpu(
            "test_pytorch_amp",
            markers(Some("amp"), "resnet50"),
            NATIVE_AMP,
            PYTORCH_TESTS,
            AMP,
        )
    },
    Scenario {
        pool: InstancePool::SingleGpu,
        ..gpu(
            "test_pytorch_telemetry_gpu",
            markers(Some("telemetry"), "N/A"),
            TELEMETRY_GATES,
            PYTORCH_TESTS,
            TELEMETRY,
        )
    },
    cpu(
        "test_pytorch_telemetry_cpu",
        markers(Some("telemetry"), "N/A"),
        TELEMETRY_GATES,
        PYTORCH_TESTS,
        TELEMETRY,
    ),
];

/// All scenarios in definition order
pub fn all() -> &'static [Scenario] {
    SCENARIOS
}

/// Look up a scenario by name
pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

/// Scenario selection by name and markers
#[derive(Clone, Debug, Default)]
pub struct ScenarioFilter {
    pub names: Vec<String>,
    pub integration: Option<String>,
    pub model: Option<String>,
}

impl ScenarioFilter {
    /// First selected name that is not in the catalog
    pub fn unknown_name(&self) -> Option<&str> {
        self.names
            .iter()
            .map(String::as_str)
            .find(|name| find(name).is_none())
    }

    pub fn matches(&self, scenario: &Scenario) -> bool {
        if !self.names.is_empty() && !self.names.iter().any(|n| n == scenario.name) {
            return false;
        }
        if let Some(integration) = &self.integration {
            if scenario.markers.integration != Some(integration.as_str()) {
                return false;
            }
        }
        if let Some(model) = &self.model {
            if scenario.markers.model != model.as_str() {
                return false;
            }
        }
        true
    }
}

/// Cases produced by collection
#[derive(Clone, Debug, Default)]
pub struct Collection {
    pub cases: Vec<CollectedCase>,
    /// Scenarios whose instance pool could not be resolved
    pub errors: Vec<TestResult>,
}

/// Instantiate one case per (scenario x instance type)
///
/// Each pool is resolved once, so every scenario sharing a pool sees the
/// same instance list. A pool that fails to resolve only affects the
/// scenarios drawing from it.
pub fn collect(
    scenarios: &'static [Scenario],
    selector: &InstanceTypeSelector,
    filter: &ScenarioFilter,
) -> Collection {
    let mut pools = BTreeMap::new();
    let mut collection = Collection::default();

    for scenario in scenarios.iter().filter(|s| filter.matches(s)) {
        let resolved = pools
            .entry(scenario.pool)
            .or_insert_with(|| selector.select_pool(scenario.pool));

        match resolved {
            Ok(instance_types) => {
                for instance_type in instance_types.iter() {
                    debug!("Collected {}[{}]", scenario.name, instance_type);
                    collection
                        .cases
                        .push(CollectedCase::new(scenario, instance_type.as_str()));
                }
            }
            Err(e) => {
                collection.errors.push(TestResult::collection_error(
                    scenario.name,
                    format!("Cannot resolve {} instance types: {e}", scenario.pool),
                ));
            }
        }
    }

    collection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InstanceCatalog, Processor};
    use std::collections::HashSet;

    #[test]
    fn test_catalog_shape() {
        assert_eq!(all().len(), 16);

        let names: HashSet<_> = all().iter().map(|s| s.name).collect();
        assert_eq!(names.len(), all().len(), "scenario names must be unique");
    }

    #[test]
    fn test_every_scenario_names_one_command() {
        for scenario in all() {
            let command = scenario.command_path("/test/bin");
            assert!(command.as_str().starts_with("/test/bin/"));
            assert!(command.as_str().ends_with(scenario.script));
        }
    }

    #[test]
    fn test_hardware_classes() {
        assert_eq!(find("test_pytorch_standalone_cpu").unwrap().hardware(), Processor::Cpu);
        assert_eq!(find("test_pytorch_gloo").unwrap().hardware(), Processor::Gpu);
        assert_eq!(find("test_pytorch_amp").unwrap().pool, InstancePool::MultiGpu);
        assert_eq!(
            find("test_pytorch_telemetry_gpu").unwrap().pool,
            InstancePool::SingleGpu
        );
    }

    #[test]
    fn test_compatibility_check_only_on_gpu() {
        for scenario in all() {
            assert_eq!(
                scenario.check_compatibility,
                scenario.hardware() == Processor::Gpu,
                "{}",
                scenario.name
            );
        }
    }

    #[test]
    fn test_standalone_command_path() {
        let scenario = find("test_pytorch_standalone_cpu").unwrap();
        assert_eq!(
            scenario.command_path("/test/bin").as_str(),
            "/test/bin/pytorch_tests/testPyTorchStandalone"
        );
        assert_eq!(
            find("test_pytorch_train_dgl_gpu")
                .unwrap()
                .command_path("/test/bin")
                .as_str(),
            "/test/bin/dgl_tests/testPyTorchDGL"
        );
    }

    #[test]
    fn test_filter_by_markers() {
        let filter = ScenarioFilter {
            integration: Some("telemetry".to_string()),
            ..Default::default()
        };
        let names: Vec<_> = all()
            .iter()
            .filter(|s| filter.matches(s))
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            vec!["test_pytorch_telemetry_gpu", "test_pytorch_telemetry_cpu"]
        );

        let filter = ScenarioFilter {
            model: Some("resnet18".to_string()),
            ..Default::default()
        };
        assert_eq!(all().iter().filter(|s| filter.matches(s)).count(), 3);
    }

    #[test]
    fn test_unknown_scenario_name() {
        let filter = ScenarioFilter {
            names: vec!["test_pytorch_amp".to_string(), "test_pytorch_amd".to_string()],
            ..Default::default()
        };
        assert_eq!(filter.unknown_name(), Some("test_pytorch_amd"));
        assert!(find("test_pytorch_amp").is_some());

        let filter = ScenarioFilter {
            names: vec!["test_nvapex".to_string()],
            ..Default::default()
        };
        assert_eq!(filter.unknown_name(), None);
        assert_eq!(ScenarioFilter::default().unknown_name(), None);
    }

    #[test]
    fn test_collect_one_case_per_instance_type() {
        let selector = InstanceTypeSelector::new(InstanceCatalog::new())
            .with_override(Processor::Gpu, ["p3.2xlarge", "p3.8xlarge"]);
        let filter = ScenarioFilter {
            names: vec![
                "test_pytorch_standalone_gpu".to_string(),
                "test_pytorch_standalone_cpu".to_string(),
                "test_pytorch_amp".to_string(),
            ],
            ..Default::default()
        };

        let collection = collect(all(), &selector, &filter);
        assert!(collection.errors.is_empty());

        let ids: Vec<String> = collection.cases.iter().map(|c| c.id()).collect();
        assert_eq!(
            ids,
            vec![
                "test_pytorch_standalone_gpu[p3.2xlarge]",
                "test_pytorch_standalone_gpu[p3.8xlarge]",
                "test_pytorch_standalone_cpu[c5.9xlarge]",
                "test_pytorch_amp[p3.8xlarge]",
            ]
        );
    }

    #[test]
    fn test_collect_pool_error_is_isolated() {
        let selector = InstanceTypeSelector::new(InstanceCatalog::new())
            .with_override(Processor::Gpu, ["c5.large"]);

        let collection = collect(all(), &selector, &ScenarioFilter::default());

        let cpu_scenarios = all()
            .iter()
            .filter(|s| s.hardware() == Processor::Cpu)
            .count();
        assert_eq!(collection.cases.len(), cpu_scenarios);
        assert_eq!(collection.errors.len(), all().len() - cpu_scenarios);
    }
}
