//! Jobs and their orchestration.
//!
//! A [`Job`] pairs a [`JobDefinition`] with a [`StepFactory`] that opens the
//! record source, transform and sinks of each step. The [`JobOrchestrator`]
//! launches registered jobs by name:
//!
//! - a completed identity is rejected with `AlreadyCompleted`
//! - a failed (or abandoned) identity is restarted, each partition resuming
//!   from its last committed chunk
//! - anything else is a fresh launch: the input is partitioned and every
//!   partition runs on the worker pool

mod definition;
mod orchestrator;
mod outcome;
mod runner;
#[cfg(test)]
mod scenario_tests;

pub use definition::JobDefinition;
pub use orchestrator::JobOrchestrator;
pub use outcome::{
    LaunchOutcome, EXIT_ALREADY_COMPLETE, EXIT_ALREADY_RUNNING, EXIT_COMPLETED, EXIT_ERROR,
    EXIT_FAILED,
};
pub use runner::{Job, JobRunner, StepFactory};
