//! Mapping launch results to process exit codes.

use crate::core::{BatchStatus, JobExecution};
use crate::errors::BatchError;

/// The execution completed.
pub const EXIT_COMPLETED: i32 = 0;
/// The execution failed.
pub const EXIT_FAILED: i32 = 1;
/// The launch never ran: configuration, resource or store error.
pub const EXIT_ERROR: i32 = 2;
/// The instance had already completed.
pub const EXIT_ALREADY_COMPLETE: i32 = 3;
/// The instance is running in this process.
pub const EXIT_ALREADY_RUNNING: i32 = 4;

/// The result of a launch, as seen by a command-line caller.
#[derive(Debug)]
pub enum LaunchOutcome {
    /// The execution reached `COMPLETED`.
    Completed(JobExecution),
    /// The execution reached `FAILED`.
    Failed(JobExecution),
    /// The launch was rejected or could not start.
    Rejected(BatchError),
}

impl LaunchOutcome {
    /// The execution, when one ran.
    #[must_use]
    pub fn execution(&self) -> Option<&JobExecution> {
        match self {
            Self::Completed(execution) | Self::Failed(execution) => Some(execution),
            Self::Rejected(_) => None,
        }
    }

    /// The process exit code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed(_) => EXIT_COMPLETED,
            Self::Failed(_) => EXIT_FAILED,
            Self::Rejected(BatchError::AlreadyCompleted(_)) => EXIT_ALREADY_COMPLETE,
            Self::Rejected(BatchError::AlreadyRunning { .. }) => EXIT_ALREADY_RUNNING,
            Self::Rejected(_) => EXIT_ERROR,
        }
    }
}

impl From<crate::errors::Result<JobExecution>> for LaunchOutcome {
    fn from(result: crate::errors::Result<JobExecution>) -> Self {
        match result {
            Ok(execution) if execution.status == BatchStatus::Completed => {
                Self::Completed(execution)
            }
            Ok(execution) => Self::Failed(execution),
            Err(err) => Self::Rejected(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JobInstance, JobParameters};
    use crate::errors::AlreadyCompletedError;

    fn execution(status: BatchStatus) -> JobExecution {
        let instance = JobInstance {
            id: 1,
            name: "importPeople".to_string(),
            key: "k".to_string(),
        };
        let mut execution = JobExecution::new(1, &instance, JobParameters::new());
        execution.status = status;
        execution
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            LaunchOutcome::from(Ok(execution(BatchStatus::Completed))).exit_code(),
            EXIT_COMPLETED
        );
        assert_eq!(
            LaunchOutcome::from(Ok(execution(BatchStatus::Failed))).exit_code(),
            EXIT_FAILED
        );
        let rejected: crate::errors::Result<JobExecution> =
            Err(AlreadyCompletedError::new("importPeople", "k").into());
        assert_eq!(LaunchOutcome::from(rejected).exit_code(), EXIT_ALREADY_COMPLETE);
        let running = LaunchOutcome::Rejected(BatchError::AlreadyRunning {
            job: "importPeople".to_string(),
            key: "k".to_string(),
        });
        assert_eq!(running.exit_code(), EXIT_ALREADY_RUNNING);
        assert!(running.execution().is_none());
        assert_eq!(
            LaunchOutcome::Rejected(BatchError::configuration("no input")).exit_code(),
            EXIT_ERROR
        );
    }
}
