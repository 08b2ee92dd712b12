//! Instance-type selection
//!
//! Resolves, per processor kind and GPU filter, the ordered list of instance
//! types a scenario is parametrized over.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use super::{CatalogError, InstanceCatalog, Processor};

/// GPU-count filter applied to candidate instance types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceFilter {
    SingleGpu,
    MultiGpu,
}

impl InstanceFilter {
    pub fn accepts(&self, gpu_count: u32) -> bool {
        match self {
            InstanceFilter::SingleGpu => gpu_count == 1,
            InstanceFilter::MultiGpu => gpu_count > 1,
        }
    }
}

/// Instance pools used by the scenario catalog
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstancePool {
    Gpu,
    Cpu,
    SingleGpu,
    MultiGpu,
}

impl InstancePool {
    pub fn default_instance_type(&self) -> &'static str {
        match self {
            InstancePool::Gpu => "g3.8xlarge",
            InstancePool::Cpu => "c5.9xlarge",
            InstancePool::SingleGpu => "p3.2xlarge",
            InstancePool::MultiGpu => "g3.8xlarge",
        }
    }

    pub fn processor(&self) -> Processor {
        match self {
            InstancePool::Cpu => Processor::Cpu,
            _ => Processor::Gpu,
        }
    }

    pub fn filter(&self) -> Option<InstanceFilter> {
        match self {
            InstancePool::SingleGpu => Some(InstanceFilter::SingleGpu),
            InstancePool::MultiGpu => Some(InstanceFilter::MultiGpu),
            _ => None,
        }
    }

    pub fn all() -> Vec<InstancePool> {
        vec![
            InstancePool::Gpu,
            InstancePool::Cpu,
            InstancePool::SingleGpu,
            InstancePool::MultiGpu,
        ]
    }
}

impl fmt::Display for InstancePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstancePool::Gpu => "GPU",
            InstancePool::Cpu => "CPU",
            InstancePool::SingleGpu => "single-GPU",
            InstancePool::MultiGpu => "multi-GPU",
        };
        write!(f, "{label}")
    }
}

/// Resolves instance types from overrides and the catalog
#[derive(Clone, Debug, Default)]
pub struct InstanceTypeSelector {
    catalog: InstanceCatalog,
    overrides: BTreeMap<Processor, Vec<String>>,
}

impl InstanceTypeSelector {
    pub fn new(catalog: InstanceCatalog) -> Self {
        Self {
            catalog,
            overrides: BTreeMap::new(),
        }
    }

    /// Set the override list for a processor kind, replacing any previous one
    pub fn with_override<I, S>(mut self, processor: Processor, instance_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list: Vec<String> = instance_types
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if list.is_empty() {
            self.overrides.remove(&processor);
        } else {
            self.overrides.insert(processor, list);
        }
        self
    }

    pub fn catalog(&self) -> &InstanceCatalog {
        &self.catalog
    }

    /// Instance types to parametrize over
    ///
    /// Candidates come from the override list for `processor`; when the
    /// filter leaves nothing, `default` is used. The result is never empty.
    pub fn select(
        &self,
        default: &str,
        processor: Processor,
        filter: Option<InstanceFilter>,
    ) -> Result<Vec<String>, CatalogError> {
        self.ensure_processor(default, processor)?;

        let mut selected: Vec<String> = Vec::new();
        for candidate in self.overrides.get(&processor).into_iter().flatten() {
            if selected.contains(candidate) {
                continue;
            }
            self.ensure_processor(candidate, processor)?;

            if let Some(filter) = filter {
                let gpus = self.catalog.gpu_count(candidate)?;
                if !filter.accepts(gpus) {
                    debug!("Filtered out {} ({} GPUs) by {:?}", candidate, gpus, filter);
                    continue;
                }
            }
            selected.push(candidate.clone());
        }

        if selected.is_empty() {
            selected.push(default.to_string());
        }

        Ok(selected)
    }

    /// Resolve one of the scenario pools
    pub fn select_pool(&self, pool: InstancePool) -> Result<Vec<String>, CatalogError> {
        self.select(pool.default_instance_type(), pool.processor(), pool.filter())
    }

    fn ensure_processor(&self, instance_type: &str, expected: Processor) -> Result<(), CatalogError> {
        if self.catalog.processor(instance_type)? == expected {
            Ok(())
        } else {
            Err(CatalogError::ProcessorMismatch {
                instance_type: instance_type.to_string(),
                expected,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> InstanceTypeSelector {
        InstanceTypeSelector::new(InstanceCatalog::new())
    }

    #[test]
    fn test_default_without_overrides() {
        let selector = selector();
        assert_eq!(
            selector.select_pool(InstancePool::Gpu).unwrap(),
            vec!["g3.8xlarge"]
        );
        assert_eq!(
            selector.select_pool(InstancePool::Cpu).unwrap(),
            vec!["c5.9xlarge"]
        );
        assert_eq!(
            selector.select_pool(InstancePool::SingleGpu).unwrap(),
            vec!["p3.2xlarge"]
        );
    }

    #[test]
    fn test_override_list_kept_in_order() {
        let selector =
            selector().with_override(Processor::Gpu, ["p3.8xlarge", "g4dn.xlarge", "p3.8xlarge"]);
        assert_eq!(
            selector.select("g3.8xlarge", Processor::Gpu, None).unwrap(),
            vec!["p3.8xlarge", "g4dn.xlarge"]
        );
    }

    #[test]
    fn test_gpu_filters() {
        let selector = selector().with_override(Processor::Gpu, ["p3.8xlarge", "g4dn.xlarge"]);
        assert_eq!(
            selector.select_pool(InstancePool::SingleGpu).unwrap(),
            vec!["g4dn.xlarge"]
        );
        assert_eq!(
            selector.select_pool(InstancePool::MultiGpu).unwrap(),
            vec!["p3.8xlarge"]
        );
    }

    #[test]
    fn test_filter_leaving_nothing_falls_back_to_default() {
        let selector = selector().with_override(Processor::Gpu, ["g4dn.xlarge"]);
        assert_eq!(
            selector.select_pool(InstancePool::MultiGpu).unwrap(),
            vec!["g3.8xlarge"]
        );
    }

    #[test]
    fn test_processor_mismatch_rejected() {
        let selector = selector().with_override(Processor::Gpu, ["c5.9xlarge"]);
        assert_eq!(
            selector.select_pool(InstancePool::Gpu),
            Err(CatalogError::ProcessorMismatch {
                instance_type: "c5.9xlarge".to_string(),
                expected: Processor::Gpu,
            })
        );

        assert!(selector
            .select("p3.2xlarge", Processor::Cpu, None)
            .is_err());
    }

    #[test]
    fn test_unknown_override_is_error() {
        let selector = selector().with_override(Processor::Cpu, ["zz9.large"]);
        assert!(matches!(
            selector.select_pool(InstancePool::Cpu),
            Err(CatalogError::UnknownInstanceType(_))
        ));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let selector = selector().with_override(Processor::Gpu, ["p3.16xlarge", "g3.16xlarge"]);
        let first = selector.select_pool(InstancePool::MultiGpu).unwrap();
        let second = selector.select_pool(InstancePool::MultiGpu).unwrap();
        assert_eq!(first, second);
    }
}
