//! Persisted execution state.
//!
//! The [`ExecutionStateStore`] records job instances, job executions and step
//! executions, and carries the execution context that lets a restarted step
//! resume at its last committed chunk. Every operation is individually atomic;
//! concurrent workers update distinct step executions and only meet on the
//! job execution's aggregate counters, which are incremented atomically.

mod memory;
mod sqlite;

pub use memory::InMemoryStateStore;
pub use sqlite::SqliteStateStore;

use async_trait::async_trait;

use crate::core::{
    BatchStatus, JobExecution, JobIdentity, JobInstance, JobParameters, StepCounts,
    StepExecution,
};
use crate::errors::StateResult;

/// Storage for job and step execution records.
#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    /// Finds the instance of an identity, if it was ever launched.
    async fn find_job_instance(&self, identity: &JobIdentity) -> StateResult<Option<JobInstance>>;

    /// Creates the instance of an identity. Fails if it already exists.
    async fn create_job_instance(&self, identity: &JobIdentity) -> StateResult<JobInstance>;

    /// Returns the most recent execution of an identity, steps included.
    async fn find_latest_execution(
        &self,
        identity: &JobIdentity,
    ) -> StateResult<Option<JobExecution>>;

    /// Returns every execution of an identity, newest first, steps included.
    async fn find_job_executions(&self, identity: &JobIdentity) -> StateResult<Vec<JobExecution>>;

    /// Creates a new `STARTING` execution of an instance.
    async fn create_job_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> StateResult<JobExecution>;

    /// Persists status, times, counters and exit message of a non-final execution.
    async fn update_job_execution(&self, execution: &JobExecution) -> StateResult<()>;

    /// Atomically adds to the aggregate counters of an execution.
    async fn add_job_counts(&self, job_execution_id: i64, delta: StepCounts) -> StateResult<()>;

    /// Marks an execution terminal and returns the final record.
    async fn finalize_job_execution(
        &self,
        job_execution_id: i64,
        status: BatchStatus,
        exit_message: Option<String>,
    ) -> StateResult<JobExecution>;

    /// Registers a step execution and returns it with its assigned id.
    async fn create_step_execution(&self, step: StepExecution) -> StateResult<StepExecution>;

    /// Persists counters, status and context of a step execution.
    async fn update_step_execution(&self, step: &StepExecution) -> StateResult<()>;

    /// Returns the steps of an execution in creation order.
    async fn find_step_executions(&self, job_execution_id: i64) -> StateResult<Vec<StepExecution>>;
}
