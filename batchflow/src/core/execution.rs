//! Execution records: job instances, job executions, step executions and
//! their persisted execution context.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::parameters::{JobIdentity, JobParameters};
use super::status::{BatchStatus, SkipPhase, StepStatus};
use crate::errors::BatchError;

/// Context key holding the input resource of a partition.
pub const INPUT_FILE_KEY: &str = "input.file";
/// Context key holding the error sink resource of a partition.
pub const ERROR_FILE_KEY: &str = "output.error.file";
/// Context key holding the resume offset (consumed records at the last commit).
pub const READ_OFFSET_KEY: &str = "reader.read.count";
/// Context key holding the per-phase skip counters snapshot.
pub const SKIP_COUNTERS_KEY: &str = "skip.counters";

/// Persisted key-value state of a step execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    values: BTreeMap<String, serde_json::Value>,
}

impl ExecutionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a serializable value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Serialize) {
        // Serializing plain data into a Value cannot fail; Null keeps the key visible if it does.
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.values.insert(key.into(), value);
    }

    /// Stores a string value.
    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(key.into(), serde_json::Value::String(value.into()));
    }

    /// Gets a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Gets a string value.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(serde_json::Value::as_str)
    }

    /// Gets an unsigned integer value.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(serde_json::Value::as_u64)
    }

    /// Deserializes a value into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<Result<T, BatchError>> {
        self.values.get(key).map(|v| {
            serde_json::from_value(v.clone())
                .map_err(|e| BatchError::Internal(format!("context key '{key}': {e}")))
        })
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the context is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Per-phase skip counters of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounters {
    /// Records skipped while reading.
    pub read: u64,
    /// Records skipped while transforming.
    pub process: u64,
    /// Records skipped while writing.
    pub write: u64,
}

impl SkipCounters {
    /// Total skips across phases.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.read + self.process + self.write
    }

    /// Increments the counter of `phase`.
    pub fn increment(&mut self, phase: SkipPhase) {
        match phase {
            SkipPhase::Read => self.read += 1,
            SkipPhase::Process => self.process += 1,
            SkipPhase::Write => self.write += 1,
        }
    }

    /// Component-wise sum.
    #[must_use]
    pub fn plus(&self, other: &Self) -> Self {
        Self {
            read: self.read + other.read,
            process: self.process + other.process,
            write: self.write + other.write,
        }
    }
}

/// The counters a step commits, used to take and restore chunk snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepCounts {
    /// Consumed records.
    pub read: u64,
    /// Written items.
    pub write: u64,
    /// Skipped records.
    pub skips: SkipCounters,
}

impl StepCounts {
    /// Field-by-field sum.
    #[must_use]
    pub fn plus(&self, other: &Self) -> Self {
        Self {
            read: self.read + other.read,
            write: self.write + other.write,
            skips: self.skips.plus(&other.skips),
        }
    }

    /// Returns `self - earlier`, field by field.
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            read: self.read.saturating_sub(earlier.read),
            write: self.write.saturating_sub(earlier.write),
            skips: SkipCounters {
                read: self.skips.read.saturating_sub(earlier.skips.read),
                process: self.skips.process.saturating_sub(earlier.skips.process),
                write: self.skips.write.saturating_sub(earlier.skips.write),
            },
        }
    }
}

/// A job instance: created once per distinct identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    /// Store-assigned identifier.
    pub id: i64,
    /// Job name.
    pub name: String,
    /// Identity key (hash of the parameters).
    pub key: String,
}

/// One unit of work inside a job execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    /// Store-assigned identifier (0 until created).
    pub id: i64,
    /// Owning job execution.
    pub job_execution_id: i64,
    /// Step name, unique within its job execution.
    pub step_name: String,
    /// Current status.
    pub status: StepStatus,
    /// Consumed records, including skipped ones.
    pub read_count: u64,
    /// Items written to the sink.
    pub write_count: u64,
    /// Skip counters per phase.
    pub skips: SkipCounters,
    /// Committed chunks.
    pub commit_count: u64,
    /// Chunks rolled back.
    pub rollback_count: u64,
    /// Persisted resume state.
    pub context: ExecutionContext,
    /// When the step started running.
    pub start_time: Option<DateTime<Utc>>,
    /// When the step reached a terminal state.
    pub end_time: Option<DateTime<Utc>>,
    /// Failure description, if any.
    pub exit_message: Option<String>,
}

impl StepExecution {
    /// Creates a pending step execution.
    #[must_use]
    pub fn new(job_execution_id: i64, step_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            job_execution_id,
            step_name: step_name.into(),
            status: StepStatus::Pending,
            read_count: 0,
            write_count: 0,
            skips: SkipCounters::default(),
            commit_count: 0,
            rollback_count: 0,
            context: ExecutionContext::new(),
            start_time: None,
            end_time: None,
            exit_message: None,
        }
    }

    /// Sets the execution context.
    #[must_use]
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Total skips.
    #[must_use]
    pub fn skip_count(&self) -> u64 {
        self.skips.total()
    }

    /// Snapshot of the committed counters.
    #[must_use]
    pub fn counts(&self) -> StepCounts {
        StepCounts {
            read: self.read_count,
            write: self.write_count,
            skips: self.skips,
        }
    }

    /// Restores counters from a snapshot.
    pub fn restore_counts(&mut self, counts: StepCounts) {
        self.read_count = counts.read;
        self.write_count = counts.write;
        self.skips = counts.skips;
    }

    /// Resume offset recorded at the last commit.
    #[must_use]
    pub fn resume_offset(&self) -> u64 {
        self.context.get_u64(READ_OFFSET_KEY).unwrap_or(0)
    }

    /// Moves the step to `next`, refusing to leave a terminal state.
    pub fn transition(&mut self, next: StepStatus) -> Result<(), BatchError> {
        if !self.status.can_transition_to(next) {
            return Err(BatchError::Internal(format!(
                "step '{}' cannot move from {} to {}",
                self.step_name, self.status, next
            )));
        }
        let now = Utc::now();
        if next == StepStatus::Running {
            self.start_time = Some(now);
        }
        if next.is_terminal() {
            self.end_time = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Builds the step of a new job execution that continues `prior`.
    ///
    /// Completed steps are carried over as they are; other steps inherit the
    /// committed counters and context and start again as pending.
    #[must_use]
    pub fn continue_from(prior: &Self, job_execution_id: i64) -> Self {
        let mut next = Self::new(job_execution_id, prior.step_name.clone())
            .with_context(prior.context.clone());
        next.restore_counts(prior.counts());
        next.commit_count = prior.commit_count;
        next.rollback_count = prior.rollback_count;
        if prior.status == StepStatus::Completed {
            next.status = StepStatus::Completed;
            next.start_time = prior.start_time;
            next.end_time = prior.end_time;
        }
        next
    }
}

/// One attempt to run a job instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    /// Store-assigned identifier.
    pub id: i64,
    /// Owning instance.
    pub instance_id: i64,
    /// Job name.
    pub job_name: String,
    /// Launch parameters.
    pub parameters: JobParameters,
    /// Current status.
    pub status: BatchStatus,
    /// Creation time.
    pub create_time: DateTime<Utc>,
    /// When work started.
    pub start_time: Option<DateTime<Utc>>,
    /// When the execution was finalized.
    pub end_time: Option<DateTime<Utc>>,
    /// Aggregate consumed records.
    pub read_count: u64,
    /// Aggregate written items.
    pub write_count: u64,
    /// Aggregate skipped records.
    pub skip_count: u64,
    /// Failure description, if any.
    pub exit_message: Option<String>,
    /// Step executions, in creation order.
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    /// Creates a starting execution for `instance`.
    #[must_use]
    pub fn new(id: i64, instance: &JobInstance, parameters: JobParameters) -> Self {
        Self {
            id,
            instance_id: instance.id,
            job_name: instance.name.clone(),
            parameters,
            status: BatchStatus::Starting,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            exit_message: None,
            step_executions: Vec::new(),
        }
    }

    /// The identity this execution belongs to.
    #[must_use]
    pub fn identity(&self) -> JobIdentity {
        JobIdentity::new(self.job_name.clone(), self.parameters.clone())
    }

    /// Finds a step execution by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepExecution> {
        self.step_executions.iter().find(|s| s.step_name == name)
    }
}
