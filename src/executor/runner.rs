//! Test execution runner
//!
//! Runs collected cases against one image: preconditions first, then one
//! dispatch per runnable case.

use std::sync::Arc;
use tracing::{error, info};

use super::preconditions::{
    default_external_gates, ExternalGates, PreconditionError, Preconditions, Verdict,
};
use crate::catalog::{CompatibilityCheck, InstanceCatalog, RuleBasedCompatibility};
use crate::models::{CollectedCase, ImageReference, RunSummary, TestResult, CONTAINER_TESTS_PREFIX};
use crate::remote::{ConnectionProvider, Dispatch};
use crate::scenarios::Collection;
use crate::utils::Timer;

/// Read-only state shared by every case of a run
pub struct RunContext {
    pub image: ImageReference,
    pub prefix: String,
    pub catalog: InstanceCatalog,
    pub gates: ExternalGates,
    pub compat: Arc<dyn CompatibilityCheck>,
    pub provider: Arc<dyn ConnectionProvider>,
    pub dispatcher: Arc<dyn Dispatch>,
}

impl RunContext {
    pub fn new(
        image: ImageReference,
        provider: Arc<dyn ConnectionProvider>,
        dispatcher: Arc<dyn Dispatch>,
    ) -> Self {
        Self {
            image,
            prefix: CONTAINER_TESTS_PREFIX.to_string(),
            catalog: InstanceCatalog::new(),
            gates: default_external_gates(),
            compat: Arc::new(RuleBasedCompatibility::default()),
            provider,
            dispatcher,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_catalog(mut self, catalog: InstanceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_gates(mut self, gates: ExternalGates) -> Self {
        self.gates = gates;
        self
    }

    pub fn with_compat(mut self, compat: Arc<dyn CompatibilityCheck>) -> Self {
        self.compat = compat;
        self
    }

    /// Precondition verdict for a case, without touching any host
    pub fn plan(&self, case: &CollectedCase) -> Result<Verdict, PreconditionError> {
        Preconditions::new(&self.image, &self.catalog, &self.gates, self.compat.as_ref())
            .evaluate(case)
    }
}

/// Run one case to a terminal result
pub(crate) async fn execute_case(context: &RunContext, case: &CollectedCase) -> TestResult {
    match context.plan(case) {
        Ok(Verdict::Run) => {}
        Ok(Verdict::Skip(reason)) => return TestResult::skip(case, reason),
        Err(e) => {
            error!("{} configuration error: {}", case, e);
            return TestResult::error(case, e.to_string());
        }
    }

    info!("Running {}", case);
    let timer = Timer::start(case.id());

    let connection = match context.provider.connect(&case.instance_type).await {
        Ok(connection) => connection,
        Err(e) => {
            error!("{} failed: {}", case, e);
            return TestResult::fail(case, timer.stop(), e.to_string());
        }
    };

    let command = case.scenario.command_path(&context.prefix);
    match context
        .dispatcher
        .execute(connection.as_ref(), &context.image, &command)
        .await
    {
        Ok(_) => TestResult::pass(case, timer.stop()),
        Err(e) => {
            error!("{} failed: {}", case, e);
            TestResult::fail(case, timer.stop(), e.to_string())
        }
    }
}

/// Sequential scenario runner
pub struct ScenarioRunner {
    context: Arc<RunContext>,
}

impl ScenarioRunner {
    pub fn new(context: Arc<RunContext>) -> Self {
        Self { context }
    }

    /// Run a single case
    pub async fn run_case(&self, case: &CollectedCase) -> TestResult {
        execute_case(&self.context, case).await
    }

    /// Run every collected case in order
    pub async fn run_all(&self, collection: Collection) -> RunSummary {
        info!(
            "Running {} cases against {}",
            collection.cases.len(),
            self.context.image
        );

        let timer = Timer::start("run");
        let mut results = collection.errors;

        for case in &collection.cases {
            let result = self.run_case(case).await;
            info!("  {}", result);
            results.push(result);
        }

        let summary = RunSummary::new(self.context.image.uri(), results);

        info!(
            "Run completed in {}ms - Pass: {}/{} ({:.1}%)",
            timer.elapsed_ms(),
            summary.passed,
            summary.total,
            summary.pass_rate()
        );

        summary
    }
}
