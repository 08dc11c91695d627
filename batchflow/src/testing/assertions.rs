//! Test assertions for execution records.

use crate::core::{BatchStatus, JobExecution, StepExecution, StepStatus};

/// Asserts that `read == write + skip` for the step.
pub fn assert_counts_conserved(step: &StepExecution) {
    assert_eq!(
        step.read_count,
        step.write_count + step.skip_count(),
        "step '{}' does not conserve counts: read={} write={} skip={}",
        step.step_name,
        step.read_count,
        step.write_count,
        step.skip_count()
    );
}

/// Asserts the read/write/skip counters of a step.
pub fn assert_step_counts(step: &StepExecution, read: u64, write: u64, skip: u64) {
    assert_eq!(
        (step.read_count, step.write_count, step.skip_count()),
        (read, write, skip),
        "unexpected counts (read, write, skip) for step '{}'",
        step.step_name
    );
}

/// Asserts the status of a step.
pub fn assert_step_status(step: &StepExecution, expected: StepStatus) {
    assert_eq!(
        step.status, expected,
        "step '{}': expected {expected}, got {} ({:?})",
        step.step_name, step.status, step.exit_message
    );
}

/// Asserts the status and aggregate counters of a job execution.
pub fn assert_job(execution: &JobExecution, status: BatchStatus, read: u64, write: u64, skip: u64) {
    assert_eq!(
        execution.status, status,
        "job '{}': expected {status}, got {} ({:?})",
        execution.job_name, execution.status, execution.exit_message
    );
    assert_eq!(
        (execution.read_count, execution.write_count, execution.skip_count),
        (read, write, skip),
        "unexpected aggregate counts (read, write, skip) for job '{}'",
        execution.job_name
    );
}
