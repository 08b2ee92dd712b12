//! Scenario definitions
//!
//! A scenario is one named integration test bound to exactly one command
//! inside the container, plus the markers and gates that decide where and
//! whether it runs.

use serde::Serialize;
use std::fmt;

use crate::catalog::{InstancePool, Processor};

/// Default directory holding the test scripts inside the container
pub const CONTAINER_TESTS_PREFIX: &str = "/test/bin";

/// Reporting markers attached to a scenario
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Markers {
    /// Integration category label
    pub integration: Option<&'static str>,

    /// Model exercised by the scenario
    pub model: &'static str,
}

/// Preconditions that skip a scenario when unmet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// Image must be built for Python 3
    Py3Only,

    /// Image framework version must be at least `version`
    MinFrameworkVersion {
        version: &'static str,
        reason: &'static str,
    },

    /// Predicate supplied by the harness configuration
    External(&'static str),
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Py3Only => write!(f, "py3_only"),
            Gate::MinFrameworkVersion { version, .. } => write!(f, ">={version}"),
            Gate::External(name) => write!(f, "{name}"),
        }
    }
}

/// Path of a script inside the container
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CommandPath(String);

impl CommandPath {
    /// Join `prefix`, the test-suite directory and the script name
    pub fn join(prefix: &str, suite: &str, script: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self(format!("{prefix}/{suite}/{script}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One integration scenario
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub name: &'static str,
    pub markers: Markers,
    pub pool: InstancePool,
    pub gates: &'static [Gate],
    /// Test-suite directory under the tests prefix
    pub suite: &'static str,
    pub script: &'static str,
    /// Whether the image/instance compatibility check applies
    pub check_compatibility: bool,
}

impl Scenario {
    /// Hardware class required by the scenario
    pub fn hardware(&self) -> Processor {
        self.pool.processor()
    }

    pub fn command_path(&self, prefix: &str) -> CommandPath {
        CommandPath::join(prefix, self.suite, self.script)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A scenario bound to one instance type at collection time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectedCase {
    pub scenario: &'static Scenario,
    pub instance_type: String,
}

impl CollectedCase {
    pub fn new(scenario: &'static Scenario, instance_type: impl Into<String>) -> Self {
        Self {
            scenario,
            instance_type: instance_type.into(),
        }
    }

    /// Case identifier, `name[instance_type]`
    pub fn id(&self) -> String {
        format!("{}[{}]", self.scenario.name, self.instance_type)
    }
}

impl fmt::Display for CollectedCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.scenario.name, self.instance_type)
    }
}
