//! Running partitions with bounded parallelism.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::{BatchStatus, StepCounts, StepExecution, StepStatus};
use crate::errors::BatchError;
use crate::step::StepOutcome;

/// Runs one partition step to a terminal state.
#[async_trait]
pub trait PartitionRunner: Send + Sync {
    /// Executes the step.
    async fn run_partition(&self, step: StepExecution) -> StepOutcome;
}

/// The aggregated result of a partitioned run.
#[derive(Debug, Default)]
pub struct JobOutcome {
    /// Outcomes of every dispatched or carried-over step, by step id.
    pub steps: Vec<StepOutcome>,
    /// Steps never dispatched because an earlier partition failed.
    pub undispatched: Vec<StepExecution>,
    /// Worker tasks that died without reporting an outcome.
    pub worker_errors: Vec<String>,
}

impl JobOutcome {
    /// `FAILED` if any partition failed or never ran, else `COMPLETED`.
    #[must_use]
    pub fn status(&self) -> BatchStatus {
        let all_ok = self.steps.iter().all(StepOutcome::is_success)
            && self.undispatched.is_empty()
            && self.worker_errors.is_empty();
        if all_ok {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        }
    }

    /// Summed counters over every step.
    #[must_use]
    pub fn counts(&self) -> StepCounts {
        self.steps
            .iter()
            .map(|o| o.execution.counts())
            .chain(self.undispatched.iter().map(StepExecution::counts))
            .fold(StepCounts::default(), |acc, c| acc.plus(&c))
    }

    /// Description of the first failure, if any.
    #[must_use]
    pub fn exit_message(&self) -> Option<String> {
        if let Some((name, err)) = self.failures().next() {
            return Some(format!("{name}: {err}"));
        }
        if let Some(msg) = self.worker_errors.first() {
            return Some(msg.clone());
        }
        if let Some(step) = self.steps.iter().find(|o| !o.is_success()) {
            return Some(format!("{} ended {}", step.execution.step_name, step.status()));
        }
        (!self.undispatched.is_empty())
            .then(|| format!("{} partition(s) not started", self.undispatched.len()))
    }

    /// Failed steps with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &BatchError)> {
        self.steps.iter().filter_map(|o| {
            o.failure
                .as_ref()
                .map(|err| (o.execution.step_name.as_str(), err))
        })
    }
}

/// Executes partition steps on a fixed number of workers.
///
/// Workers pull steps from a shared queue. Once any partition fails no new
/// partition is dispatched; partitions already running drain to their own
/// terminal state. Completed steps are reported without running.
#[derive(Debug, Clone, Copy)]
pub struct PartitionCoordinator {
    concurrency: usize,
}

impl Default for PartitionCoordinator {
    fn default() -> Self {
        Self::new(2)
    }
}

impl PartitionCoordinator {
    /// Creates a coordinator with `concurrency` workers (at least 1).
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// The worker count.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs every step and aggregates the outcomes.
    pub async fn execute(
        &self,
        steps: Vec<StepExecution>,
        runner: Arc<dyn PartitionRunner>,
    ) -> JobOutcome {
        let mut outcome = JobOutcome::default();
        let mut pending = VecDeque::new();
        for step in steps {
            if step.status == StepStatus::Completed {
                debug!(step = %step.step_name, "Partition already complete");
                outcome.steps.push(StepOutcome::completed(step));
            } else {
                pending.push_back(step);
            }
        }

        let workers = self.concurrency.min(pending.len());
        info!(
            partitions = pending.len(),
            workers,
            "Dispatching partitions"
        );
        let queue = Arc::new(Mutex::new(pending));
        let stop = Arc::new(AtomicBool::new(false));

        let mut active: FuturesUnordered<tokio::task::JoinHandle<Vec<StepOutcome>>> =
            FuturesUnordered::new();
        for worker in 0..workers {
            active.push(tokio::spawn(Self::worker_loop(
                worker,
                queue.clone(),
                stop.clone(),
                runner.clone(),
            )));
        }

        while let Some(joined) = active.next().await {
            match joined {
                Ok(results) => outcome.steps.extend(results),
                Err(e) => {
                    stop.store(true, Ordering::SeqCst);
                    error!(error = %e, "Partition worker terminated abnormally");
                    outcome.worker_errors.push(format!("partition worker failed: {e}"));
                }
            }
        }

        outcome.undispatched = queue.lock().drain(..).collect();
        if !outcome.undispatched.is_empty() {
            warn!(
                count = outcome.undispatched.len(),
                "Partitions left undispatched after a failure"
            );
        }
        outcome.steps.sort_by_key(|o| o.execution.id);
        outcome
    }

    async fn worker_loop(
        worker: usize,
        queue: Arc<Mutex<VecDeque<StepExecution>>>,
        stop: Arc<AtomicBool>,
        runner: Arc<dyn PartitionRunner>,
    ) -> Vec<StepOutcome> {
        let mut results = Vec::new();
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let next = queue.lock().pop_front();
            let Some(step) = next else {
                break;
            };
            debug!(worker, step = %step.step_name, "Worker picked partition");
            let result = runner.run_partition(step).await;
            if !result.is_success() {
                stop.store(true, Ordering::SeqCst);
            }
            results.push(result);
        }
        results
    }
}
