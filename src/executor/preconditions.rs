//! Precondition evaluation
//!
//! Decides, before any remote work, whether a collected case runs or is
//! skipped. Checks run in a fixed order: hardware, Python version, external
//! gates, minimum framework version, then image/instance compatibility.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::catalog::{CatalogError, CompatibilityCheck, InstanceCatalog};
use crate::models::{
    CollectedCase, FrameworkVersion, Gate, ImageError, ImageReference, VersionError,
};

/// Configuration problems found while evaluating a case
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("External gate {0} is not configured")]
    UnknownGate(String),

    #[error("Invalid version threshold {threshold} for gate {gate}: {source}")]
    Threshold {
        gate: String,
        threshold: String,
        #[source]
        source: VersionError,
    },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Outcome of precondition evaluation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Run,
    Skip(String),
}

/// A named gate supplied by configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalGate {
    /// Lowest framework version allowed to run
    pub min_framework_version: String,

    /// Skip reason, defaults to one naming the gate and threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ExternalGate {
    pub fn min_version(version: impl Into<String>) -> Self {
        Self {
            min_framework_version: version.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Parsed threshold
    pub fn threshold(&self, name: &str) -> Result<FrameworkVersion, PreconditionError> {
        self.min_framework_version
            .parse::<FrameworkVersion>()
            .map_err(|source| PreconditionError::Threshold {
                gate: name.to_string(),
                threshold: self.min_framework_version.clone(),
                source,
            })
    }
}

/// External gates by name
pub type ExternalGates = BTreeMap<String, ExternalGate>;

/// Gates every default configuration carries
///
/// The `pt15_and_above_only` threshold follows the gate name; `config init`
/// reminds the operator to confirm it.
pub fn default_external_gates() -> ExternalGates {
    let mut gates = ExternalGates::new();
    gates.insert(
        crate::scenarios::PT15_AND_ABOVE_ONLY.to_string(),
        ExternalGate::min_version("1.5"),
    );
    gates
}

/// Evaluates preconditions for cases against one image
pub struct Preconditions<'a> {
    image: &'a ImageReference,
    catalog: &'a InstanceCatalog,
    gates: &'a ExternalGates,
    compat: &'a dyn CompatibilityCheck,
}

impl<'a> Preconditions<'a> {
    pub fn new(
        image: &'a ImageReference,
        catalog: &'a InstanceCatalog,
        gates: &'a ExternalGates,
        compat: &'a dyn CompatibilityCheck,
    ) -> Self {
        Self {
            image,
            catalog,
            gates,
            compat,
        }
    }

    pub fn evaluate(&self, case: &CollectedCase) -> Result<Verdict, PreconditionError> {
        let verdict = self.evaluate_inner(case)?;
        if let Verdict::Skip(reason) = &verdict {
            debug!("{} skipped: {}", case, reason);
        }
        Ok(verdict)
    }

    fn evaluate_inner(&self, case: &CollectedCase) -> Result<Verdict, PreconditionError> {
        let scenario = case.scenario;
        let hardware = scenario.hardware();

        let image_processor = self.image.processor()?;
        if image_processor != hardware {
            return Ok(Verdict::Skip(format!(
                "{} requires a {hardware} image, got a {image_processor} image",
                scenario.name
            )));
        }

        let instance_processor = self.catalog.processor(&case.instance_type)?;
        if instance_processor != hardware {
            return Ok(Verdict::Skip(format!(
                "{} requires a {hardware} instance, {} is {instance_processor}",
                scenario.name, case.instance_type
            )));
        }

        for gate in scenario.gates {
            if let Verdict::Skip(reason) = self.check_gate(gate)? {
                return Ok(Verdict::Skip(reason));
            }
        }

        if scenario.check_compatibility
            && self
                .compat
                .is_incompatible(self.image, &case.instance_type)
        {
            return Ok(Verdict::Skip(format!(
                "Image {} is incompatible with instance type {}",
                self.image, case.instance_type
            )));
        }

        Ok(Verdict::Run)
    }

    fn check_gate(&self, gate: &Gate) -> Result<Verdict, PreconditionError> {
        match gate {
            Gate::Py3Only => match self.image.python_major() {
                Some(major) if major < 3 => Ok(Verdict::Skip(format!(
                    "Test requires a Python 3 image, got Python {major}"
                ))),
                _ => Ok(Verdict::Run),
            },
            Gate::External(name) => {
                let external = self
                    .gates
                    .get(*name)
                    .ok_or_else(|| PreconditionError::UnknownGate(name.to_string()))?;
                let threshold = external.threshold(name)?;
                let reason = external.reason.clone().unwrap_or_else(|| {
                    format!("{name}: requires framework version {threshold} or above")
                });
                self.check_version(&threshold, reason)
            }
            Gate::MinFrameworkVersion { version, reason } => {
                let threshold = version
                    .parse::<FrameworkVersion>()
                    .map_err(|source| PreconditionError::Threshold {
                        gate: gate.to_string(),
                        threshold: version.to_string(),
                        source,
                    })?;
                self.check_version(&threshold, reason.to_string())
            }
        }
    }

    fn check_version(
        &self,
        threshold: &FrameworkVersion,
        reason: String,
    ) -> Result<Verdict, PreconditionError> {
        let version = self.image.framework_version()?;
        if version.is_below(threshold) {
            Ok(Verdict::Skip(reason))
        } else {
            Ok(Verdict::Run)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RuleBasedCompatibility;
    use crate::scenarios;

    const PT15_GPU: &str = "pytorch-training:1.5.1-gpu-py36-cu101-ubuntu16.04";
    const PT18_GPU: &str = "pytorch-training:1.8.1-gpu-py36-cu111-ubuntu18.04";
    const PT18_CPU: &str = "pytorch-training:1.8.1-cpu-py36-ubuntu18.04";
    const PT14_CPU: &str = "pytorch-training:1.4.0-cpu-py2";

    struct AlwaysIncompatible;

    impl CompatibilityCheck for AlwaysIncompatible {
        fn is_incompatible(&self, _image: &ImageReference, _instance_type: &str) -> bool {
            true
        }
    }

    fn case(name: &str, instance_type: &str) -> CollectedCase {
        CollectedCase::new(scenarios::find(name).unwrap(), instance_type)
    }

    fn evaluate(uri: &str, case: &CollectedCase) -> Result<Verdict, PreconditionError> {
        evaluate_with(uri, case, &default_external_gates(), &RuleBasedCompatibility::default())
    }

    fn evaluate_with(
        uri: &str,
        case: &CollectedCase,
        gates: &ExternalGates,
        compat: &dyn CompatibilityCheck,
    ) -> Result<Verdict, PreconditionError> {
        let image = ImageReference::parse(uri).unwrap();
        let catalog = InstanceCatalog::new();
        Preconditions::new(&image, &catalog, gates, compat).evaluate(case)
    }

    #[test]
    fn test_amp_skipped_below_1_6() {
        let verdict = evaluate(PT15_GPU, &case("test_pytorch_amp", "g3.8xlarge")).unwrap();
        assert_eq!(
            verdict,
            Verdict::Skip("Native AMP was introduced in PyTorch 1.6".to_string())
        );

        let verdict = evaluate(PT18_GPU, &case("test_pytorch_amp", "g3.8xlarge")).unwrap();
        assert_eq!(verdict, Verdict::Run);
    }

    #[test]
    fn test_hardware_mismatch_skips() {
        let verdict =
            evaluate(PT18_CPU, &case("test_pytorch_standalone_gpu", "g3.8xlarge")).unwrap();
        assert!(matches!(verdict, Verdict::Skip(reason) if reason.contains("GPU image")));

        let verdict =
            evaluate(PT18_GPU, &case("test_pytorch_standalone_cpu", "c5.9xlarge")).unwrap();
        assert_ne!(verdict, Verdict::Run);

        let verdict =
            evaluate(PT18_CPU, &case("test_pytorch_standalone_cpu", "p3.2xlarge")).unwrap();
        assert!(matches!(verdict, Verdict::Skip(reason) if reason.contains("p3.2xlarge")));
    }

    #[test]
    fn test_py3_only_gate() {
        let verdict = evaluate(PT14_CPU, &case("test_pytorch_train_dgl_cpu", "c5.9xlarge")).unwrap();
        assert!(matches!(verdict, Verdict::Skip(reason) if reason.contains("Python 3")));

        let verdict = evaluate(PT18_CPU, &case("test_pytorch_train_dgl_cpu", "c5.9xlarge")).unwrap();
        assert_eq!(verdict, Verdict::Run);
    }

    #[test]
    fn test_external_gate_from_configuration() {
        let telemetry = case("test_pytorch_telemetry_cpu", "c5.9xlarge");

        let verdict = evaluate(PT14_CPU, &telemetry).unwrap();
        assert_eq!(
            verdict,
            Verdict::Skip("pt15_and_above_only: requires framework version 1.5.0 or above".to_string())
        );
        assert_eq!(evaluate(PT18_CPU, &telemetry).unwrap(), Verdict::Run);

        let mut gates = ExternalGates::new();
        gates.insert(
            scenarios::PT15_AND_ABOVE_ONLY.to_string(),
            ExternalGate::min_version("1.9").with_reason("telemetry needs 1.9"),
        );
        let verdict = evaluate_with(
            PT18_CPU,
            &telemetry,
            &gates,
            &RuleBasedCompatibility::default(),
        )
        .unwrap();
        assert_eq!(verdict, Verdict::Skip("telemetry needs 1.9".to_string()));
    }

    #[test]
    fn test_unconfigured_external_gate_is_an_error() {
        let err = evaluate_with(
            PT18_CPU,
            &case("test_pytorch_telemetry_cpu", "c5.9xlarge"),
            &ExternalGates::new(),
            &RuleBasedCompatibility::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PreconditionError::UnknownGate("pt15_and_above_only".to_string())
        );
    }

    #[test]
    fn test_bad_threshold_is_an_error() {
        let mut gates = ExternalGates::new();
        gates.insert(
            scenarios::PT15_AND_ABOVE_ONLY.to_string(),
            ExternalGate::min_version("one.five"),
        );
        let err = evaluate_with(
            PT18_CPU,
            &case("test_pytorch_telemetry_cpu", "c5.9xlarge"),
            &gates,
            &RuleBasedCompatibility::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PreconditionError::Threshold { .. }));

        gates.insert(
            scenarios::PT15_AND_ABOVE_ONLY.to_string(),
            ExternalGate::min_version("1..9"),
        );
        let err = evaluate_with(
            PT14_CPU,
            &case("test_pytorch_telemetry_cpu", "c5.9xlarge"),
            &gates,
            &RuleBasedCompatibility::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PreconditionError::Threshold { ref threshold, .. } if threshold == "1..9"
        ));
    }

    #[test]
    fn test_compatibility_skip_names_image_and_instance() {
        let verdict = evaluate_with(
            PT18_GPU,
            &case("test_pytorch_standalone_gpu", "p4d.24xlarge"),
            &default_external_gates(),
            &AlwaysIncompatible,
        )
        .unwrap();
        assert_eq!(
            verdict,
            Verdict::Skip(format!(
                "Image {PT18_GPU} is incompatible with instance type p4d.24xlarge"
            ))
        );
    }

    #[test]
    fn test_cpu_scenarios_ignore_compatibility() {
        let verdict = evaluate_with(
            PT18_CPU,
            &case("test_pytorch_standalone_cpu", "c5.9xlarge"),
            &default_external_gates(),
            &AlwaysIncompatible,
        )
        .unwrap();
        assert_eq!(verdict, Verdict::Run);
    }

    #[test]
    fn test_unparseable_image_is_an_error() {
        let err = evaluate(
            "pytorch-training:latest",
            &case("test_pytorch_standalone_cpu", "c5.9xlarge"),
        )
        .unwrap_err();
        assert!(matches!(err, PreconditionError::Image(ImageError::MissingProcessor(_))));
    }
}
