//! Launching jobs: identity checks, restart, partitioning and finalization.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::runner::{JobRunner, StepDispatch};
use crate::core::{
    BatchStatus, JobExecution, JobIdentity, JobInstance, JobParameters, StepCounts,
    StepExecution, StepStatus,
};
use crate::errors::{AlreadyCompletedError, BatchError, Result};
use crate::partition::{
    InputSpec, JobOutcome, PartitionCoordinator, PartitionPlan, Partitioner, INPUT_FILE_PARAM,
};
use crate::state::ExecutionStateStore;

/// Exit message recorded on executions found unfinished with no live runner.
const ABANDONED_MESSAGE: &str = "abandoned: execution did not finish before its runner stopped";

/// Removes an identity from the running set when the launch ends.
struct RunningGuard<'a> {
    running: &'a DashMap<String, String>,
    key: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.key);
    }
}

/// How a launch relates to earlier executions of the same identity.
enum LaunchKind {
    Fresh,
    Restart(JobExecution),
}

/// Top-level entry point for running jobs.
///
/// Built from an explicit store, partitioner and worker count; jobs are
/// registered by name. Each launch resolves the job identity, rejects
/// completed instances, restarts failed ones from their checkpoints and
/// otherwise partitions the input and runs every partition.
pub struct JobOrchestrator {
    store: Arc<dyn ExecutionStateStore>,
    partitioner: Partitioner,
    coordinator: PartitionCoordinator,
    jobs: DashMap<String, Arc<dyn JobRunner>>,
    running: DashMap<String, String>,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("partitioner", &self.partitioner)
            .field("coordinator", &self.coordinator)
            .field("jobs", &self.jobs.len())
            .field("running", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl JobOrchestrator {
    /// Creates an orchestrator running at most `concurrency` partitions at once.
    #[must_use]
    pub fn new(
        store: Arc<dyn ExecutionStateStore>,
        partitioner: Partitioner,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            partitioner,
            coordinator: PartitionCoordinator::new(concurrency),
            jobs: DashMap::new(),
            running: DashMap::new(),
        }
    }

    /// Registers a job under its definition's name.
    #[must_use]
    pub fn with_job(self, job: Arc<dyn JobRunner>) -> Self {
        self.register(job);
        self
    }

    /// Registers a job, replacing any job of the same name.
    pub fn register(&self, job: Arc<dyn JobRunner>) {
        self.jobs.insert(job.definition().name.clone(), job);
    }

    /// The state store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ExecutionStateStore> {
        &self.store
    }

    /// Every execution of an identity, newest first.
    pub async fn history(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Vec<JobExecution>> {
        let identity = JobIdentity::new(job_name, parameters.clone());
        Ok(self.store.find_job_executions(&identity).await?)
    }

    /// Launches `job_name` with `parameters` and waits for it to finish.
    ///
    /// Returns the final execution, `COMPLETED` or `FAILED`. Errors are
    /// returned for launches that never ran: an unknown job, a bad input
    /// specification, an instance that already completed or is running.
    pub async fn launch(&self, job_name: &str, parameters: JobParameters) -> Result<JobExecution> {
        let job = self
            .jobs
            .get(job_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BatchError::configuration(format!("No job named '{job_name}'")))?;
        job.definition().step.validate()?;

        let identity = JobIdentity::new(job_name, parameters.clone());
        let key = identity.key();
        let _guard = match self.running.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(BatchError::AlreadyRunning {
                    job: job_name.to_string(),
                    key,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(job_name.to_string());
                RunningGuard {
                    running: &self.running,
                    key: key.clone(),
                }
            }
        };

        let kind = match self.store.find_latest_execution(&identity).await? {
            Some(latest) if latest.status == BatchStatus::Completed => {
                warn!(job = job_name, key = %key, "Job instance already complete");
                return Err(AlreadyCompletedError::new(job_name, key).into());
            }
            Some(latest) if latest.status.is_running() => {
                warn!(
                    job = job_name,
                    execution = latest.id,
                    "Found abandoned execution, marking it failed"
                );
                self.store
                    .finalize_job_execution(
                        latest.id,
                        BatchStatus::Failed,
                        Some(ABANDONED_MESSAGE.to_string()),
                    )
                    .await?;
                LaunchKind::Restart(latest)
            }
            Some(latest) => LaunchKind::Restart(latest),
            None => LaunchKind::Fresh,
        };

        let definition = job.definition();
        let prior_workers: Vec<StepExecution> = match &kind {
            LaunchKind::Restart(prior) => prior
                .step_executions
                .iter()
                .filter(|s| !definition.partitioned || s.step_name != definition.manager_step)
                .cloned()
                .collect(),
            LaunchKind::Fresh => Vec::new(),
        };
        // Plans are only computed when there is nothing to resume.
        let plans = if prior_workers.is_empty() {
            self.plan(job.as_ref(), &parameters)?
        } else {
            Vec::new()
        };

        let instance = match self.store.find_job_instance(&identity).await? {
            Some(instance) => instance,
            None => self.store.create_job_instance(&identity).await?,
        };
        let mut execution = self.store.create_job_execution(&instance, &parameters).await?;
        execution.status = BatchStatus::Started;
        execution.start_time = Some(Utc::now());
        self.store.update_job_execution(&execution).await?;

        let restart = matches!(kind, LaunchKind::Restart(_));
        info!(
            job = job_name,
            key = %key,
            instance = instance.id,
            execution = execution.id,
            restart,
            "Job started"
        );

        match self
            .run_execution(&job, &instance, &mut execution, prior_workers, plans)
            .await
        {
            Ok((status, message)) => {
                let finished = self
                    .store
                    .finalize_job_execution(execution.id, status, message)
                    .await?;
                info!(
                    job = job_name,
                    execution = finished.id,
                    status = %finished.status,
                    read = finished.read_count,
                    written = finished.write_count,
                    skipped = finished.skip_count,
                    "Job finished"
                );
                Ok(finished)
            }
            Err(err) => {
                error!(job = job_name, execution = execution.id, error = %err, "Job aborted");
                if let Err(state_err) = self
                    .store
                    .finalize_job_execution(execution.id, BatchStatus::Failed, Some(err.to_string()))
                    .await
                {
                    warn!(execution = execution.id, error = %state_err, "Failed to finalize job");
                }
                Err(err)
            }
        }
    }

    /// Derives the partition plans of a fresh launch.
    fn plan(&self, job: &dyn JobRunner, parameters: &JobParameters) -> Result<Vec<PartitionPlan>> {
        let definition = job.definition();
        if definition.partitioned {
            return self
                .partitioner
                .partition(&InputSpec::from_parameters(parameters, &definition.file_pattern));
        }
        let file = parameters.get_string(INPUT_FILE_PARAM).ok_or_else(|| {
            BatchError::configuration(format!(
                "'{INPUT_FILE_PARAM}' is mandatory for job '{}'",
                definition.name
            ))
        })?;
        self.partitioner.partition(&InputSpec::file(file))
    }

    /// Registers steps, runs them and records the aggregate counters.
    async fn run_execution(
        &self,
        job: &Arc<dyn JobRunner>,
        instance: &JobInstance,
        execution: &mut JobExecution,
        prior_workers: Vec<StepExecution>,
        plans: Vec<PartitionPlan>,
    ) -> Result<(BatchStatus, Option<String>)> {
        let definition = job.definition();
        let mut manager = if definition.partitioned {
            let mut manager = self
                .store
                .create_step_execution(StepExecution::new(execution.id, &definition.manager_step))
                .await?;
            manager.transition(StepStatus::Running)?;
            self.store.update_step_execution(&manager).await?;
            Some(manager)
        } else {
            None
        };

        let mut workers = Vec::with_capacity(prior_workers.len().max(plans.len()));
        for prior in &prior_workers {
            let step = StepExecution::continue_from(prior, execution.id);
            workers.push(self.store.create_step_execution(step).await?);
        }
        for plan in &plans {
            let name = if definition.partitioned {
                definition.worker_step_name(&plan.name)
            } else {
                definition.worker_step.clone()
            };
            let step = StepExecution::new(execution.id, name).with_context(plan.to_context());
            workers.push(self.store.create_step_execution(step).await?);
        }

        let inherited = workers
            .iter()
            .fold(StepCounts::default(), |acc, s| acc.plus(&s.counts()));
        if inherited != StepCounts::default() {
            self.store.add_job_counts(execution.id, inherited).await?;
        }

        let outcome = self
            .coordinator
            .execute(
                workers,
                Arc::new(StepDispatch {
                    job: job.clone(),
                    store: self.store.clone(),
                }),
            )
            .await;
        let status = outcome.status();
        let message = outcome.exit_message();
        let counts = outcome.counts();

        if let Some(manager) = manager.as_mut() {
            self.finish_manager(manager, &outcome, status, message.clone())
                .await?;
        }

        execution.read_count = counts.read;
        execution.write_count = counts.write;
        execution.skip_count = counts.skips.total();
        execution.exit_message.clone_from(&message);
        self.store.update_job_execution(execution).await?;

        if status == BatchStatus::Failed {
            warn!(
                job = %instance.name,
                execution = execution.id,
                failed = outcome.failures().count(),
                "Job failed; rerun with the same parameters to restart"
            );
        }
        Ok((status, message))
    }

    async fn finish_manager(
        &self,
        manager: &mut StepExecution,
        outcome: &JobOutcome,
        status: BatchStatus,
        message: Option<String>,
    ) -> Result<()> {
        manager.restore_counts(outcome.counts());
        manager.commit_count = outcome
            .steps
            .iter()
            .map(|o| o.execution.commit_count)
            .sum();
        manager.rollback_count = outcome
            .steps
            .iter()
            .map(|o| o.execution.rollback_count)
            .sum();
        manager.exit_message = message;
        let next = if status == BatchStatus::Completed {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        manager.transition(next)?;
        self.store.update_step_execution(manager).await?;
        Ok(())
    }
}
