//! Parallel test execution
//!
//! Runs collected cases concurrently with a bounded number in flight.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use super::runner::{execute_case, RunContext};
use crate::models::{RunSummary, TestResult};
use crate::scenarios::Collection;
use crate::utils::Timer;

/// Parallel case executor
pub struct ParallelExecutor {
    max_concurrent: usize,
}

impl ParallelExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run every collected case, keeping collection order in the results
    pub async fn run_all(&self, context: Arc<RunContext>, collection: Collection) -> RunSummary {
        info!(
            "Running {} cases in parallel (max {} concurrent) against {}",
            collection.cases.len(),
            self.max_concurrent,
            context.image
        );

        let timer = Timer::start("parallel run");
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();

        for case in collection.cases.iter().cloned() {
            let semaphore = semaphore.clone();
            let context = context.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => return TestResult::error(&case, e.to_string()),
                };

                debug!("Starting parallel execution of {}", case);
                execute_case(&context, &case).await
            }));
        }

        let mut results = collection.errors;
        for (case, joined) in collection.cases.iter().zip(join_all(handles).await) {
            let result = joined.unwrap_or_else(|e| {
                error!("{} task aborted: {}", case, e);
                TestResult::error(case, format!("Case task aborted: {e}"))
            });
            info!("  {}", result);
            results.push(result);
        }

        let summary = RunSummary::new(context.image.uri(), results);

        info!(
            "Parallel execution completed in {}ms - Pass: {}/{} ({:.1}%)",
            timer.elapsed_ms(),
            summary.passed,
            summary.total,
            summary.pass_rate()
        );

        summary
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(4)
    }
}
