//! Core domain model types for batchflow.
//!
//! This module contains the execution model shared by every other module:
//! - Job and step status enums
//! - Job parameters and identity
//! - Job instances, job executions and step executions with their context

mod execution;
mod parameters;
mod status;

pub use execution::{
    ExecutionContext, JobExecution, JobInstance, SkipCounters, StepCounts, StepExecution,
    ERROR_FILE_KEY, INPUT_FILE_KEY, READ_OFFSET_KEY, SKIP_COUNTERS_KEY,
};
pub use parameters::{JobIdentity, JobParameter, JobParameters};
pub use status::{BatchStatus, SkipPhase, StepStatus};
