//! Binding a job definition to the collaborators of its steps.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};

use super::JobDefinition;
use crate::core::{StepExecution, StepStatus};
use crate::errors::Result;
use crate::partition::PartitionRunner;
use crate::skip::SkipPolicy;
use crate::state::ExecutionStateStore;
use crate::step::{ChunkExecutor, ChunkListener, StepOutcome, StepResources};

/// Builds the record source, transform and sinks of a step.
///
/// Called once per step run, with the step's execution context already
/// carrying its input and error resources.
#[async_trait]
pub trait StepFactory: Send + Sync {
    /// The item type produced by the transform.
    type Item: Send + Sync + 'static;

    /// Opens the resources for `step`.
    async fn open(
        &self,
        step: &StepExecution,
        policy: &SkipPolicy,
    ) -> Result<StepResources<Self::Item>>;
}

/// A runnable job, independent of its item type.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// The job definition.
    fn definition(&self) -> &JobDefinition;

    /// Runs one step of the job to a terminal state.
    async fn run_step(
        &self,
        store: Arc<dyn ExecutionStateStore>,
        step: StepExecution,
    ) -> StepOutcome;
}

/// A [`JobDefinition`] plus a [`StepFactory`].
pub struct Job<F> {
    definition: JobDefinition,
    factory: F,
    listeners: Vec<Arc<dyn ChunkListener>>,
}

impl<F> std::fmt::Debug for Job<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("definition", &self.definition)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl<F: StepFactory> Job<F> {
    /// Creates a job.
    #[must_use]
    pub fn new(definition: JobDefinition, factory: F) -> Self {
        Self {
            definition,
            factory,
            listeners: Vec::new(),
        }
    }

    /// Registers a chunk listener on every step.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ChunkListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn executor(&self, store: Arc<dyn ExecutionStateStore>) -> ChunkExecutor {
        self.listeners.iter().fold(
            ChunkExecutor::new(store, self.definition.step.clone()),
            |executor, listener| executor.with_listener(listener.clone()),
        )
    }
}

#[async_trait]
impl<F: StepFactory> JobRunner for Job<F> {
    fn definition(&self) -> &JobDefinition {
        &self.definition
    }

    async fn run_step(
        &self,
        store: Arc<dyn ExecutionStateStore>,
        mut step: StepExecution,
    ) -> StepOutcome {
        if step.status == StepStatus::Completed {
            return StepOutcome::completed(step);
        }
        match self.factory.open(&step, &self.definition.skip_policy).await {
            Ok(resources) => self.executor(store).run(step, resources).await,
            Err(err) => {
                error!(step = %step.step_name, error = %err, "Failed to open step resources");
                step.exit_message = Some(err.to_string());
                if step.status.can_transition_to(StepStatus::Failed) {
                    let _ = step.transition(StepStatus::Failed);
                }
                if let Err(state_err) = store.update_step_execution(&step).await {
                    warn!(step = %step.step_name, error = %state_err, "Failed to persist failed step");
                }
                StepOutcome::failed(step, err)
            }
        }
    }
}

/// Runs partitions of one job against one store.
pub(crate) struct StepDispatch {
    pub(crate) job: Arc<dyn JobRunner>,
    pub(crate) store: Arc<dyn ExecutionStateStore>,
}

#[async_trait]
impl PartitionRunner for StepDispatch {
    async fn run_partition(&self, step: StepExecution) -> StepOutcome {
        self.job.run_step(self.store.clone(), step).await
    }
}
