//! Image / instance-type compatibility checks

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{family, Processor};
use crate::models::{Framework, ImageReference};

/// Decides whether an image can run on an instance type
pub trait CompatibilityCheck: Send + Sync {
    fn is_incompatible(&self, image: &ImageReference, instance_type: &str) -> bool;
}

/// A known-bad combination of image attributes and instance types
///
/// Every attribute that is set must match for the rule to apply.
/// Instance types ending in `.*` match the whole family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompatibilityRule {
    pub description: String,

    pub instance_types: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor: Option<Processor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<Framework>,

    /// Version prefix such as `1.11`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_prefix: Option<String>,

    /// Matches images built against a CUDA major version below this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuda_major_below: Option<u32>,
}

impl IncompatibilityRule {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            instance_types: Vec::new(),
            processor: None,
            framework: None,
            version_prefix: None,
            cuda_major_below: None,
        }
    }

    pub fn on_instances<I, S>(mut self, instance_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instance_types
            .extend(instance_types.into_iter().map(Into::into));
        self
    }

    pub fn processor(mut self, processor: Processor) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn framework(mut self, framework: Framework, version_prefix: impl Into<String>) -> Self {
        self.framework = Some(framework);
        self.version_prefix = Some(version_prefix.into());
        self
    }

    pub fn cuda_major_below(mut self, major: u32) -> Self {
        self.cuda_major_below = Some(major);
        self
    }

    fn matches_instance(&self, instance_type: &str) -> bool {
        self.instance_types.iter().any(|pattern| {
            match pattern.strip_suffix(".*") {
                Some(pattern_family) => family(instance_type) == pattern_family,
                None => pattern == instance_type,
            }
        })
    }

    /// Attributes that cannot be read from the image never match
    pub fn matches(&self, image: &ImageReference, instance_type: &str) -> bool {
        if !self.matches_instance(instance_type) {
            return false;
        }

        if let Some(processor) = self.processor {
            if image.processor().ok() != Some(processor) {
                return false;
            }
        }

        if let Some(framework) = self.framework {
            if image.framework().ok() != Some(framework) {
                return false;
            }
        }

        if let Some(prefix) = &self.version_prefix {
            let matched = image
                .framework_version()
                .ok()
                .and_then(|version| version.matches_prefix(prefix).ok())
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }

        if let Some(major) = self.cuda_major_below {
            match image.cuda_version() {
                Some(cuda) if cuda.major < major => {}
                _ => return false,
            }
        }

        true
    }
}

/// Rule table evaluated in order
#[derive(Clone, Debug)]
pub struct RuleBasedCompatibility {
    rules: Vec<IncompatibilityRule>,
}

impl RuleBasedCompatibility {
    pub fn new(rules: Vec<IncompatibilityRule>) -> Self {
        Self { rules }
    }

    /// The built-in rules plus `extra`
    pub fn with_defaults(extra: impl IntoIterator<Item = IncompatibilityRule>) -> Self {
        let mut rules = Self::default_rules();
        rules.extend(extra);
        Self { rules }
    }

    pub fn default_rules() -> Vec<IncompatibilityRule> {
        vec![
            IncompatibilityRule::new("CUDA 10 images cannot drive A100 GPUs")
                .on_instances(["p4d.24xlarge"])
                .processor(Processor::Gpu)
                .cuda_major_below(11),
            IncompatibilityRule::new("PyTorch 1.11 GPU images do not support K80 GPUs")
                .on_instances(["p2.*"])
                .processor(Processor::Gpu)
                .framework(Framework::Pytorch, "1.11"),
        ]
    }

    pub fn rules(&self) -> &[IncompatibilityRule] {
        &self.rules
    }

    /// First rule matching the combination, if any
    pub fn matching_rule(
        &self,
        image: &ImageReference,
        instance_type: &str,
    ) -> Option<&IncompatibilityRule> {
        self.rules.iter().find(|rule| rule.matches(image, instance_type))
    }
}

impl Default for RuleBasedCompatibility {
    fn default() -> Self {
        Self::new(Self::default_rules())
    }
}

impl CompatibilityCheck for RuleBasedCompatibility {
    fn is_incompatible(&self, image: &ImageReference, instance_type: &str) -> bool {
        match self.matching_rule(image, instance_type) {
            Some(rule) => {
                debug!(
                    "{} on {} matches incompatibility rule: {}",
                    image, instance_type, rule.description
                );
                true
            }
            None => false,
        }
    }
}
