//! Static description of a job.

use serde::{Deserialize, Serialize};

use crate::skip::SkipPolicy;
use crate::step::StepConfig;

fn default_manager_step() -> String {
    "partitionStep".to_string()
}

fn default_worker_step() -> String {
    "step1".to_string()
}

fn default_file_pattern() -> String {
    "*.csv".to_string()
}

fn default_partitioned() -> bool {
    true
}

/// Names, chunking and fault tolerance of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Job name, part of every identity launched under it.
    pub name: String,
    /// Name of the partition-orchestrating step.
    #[serde(default = "default_manager_step")]
    pub manager_step: String,
    /// Name of the worker step; partitions are `<worker>:<partition>`.
    #[serde(default = "default_worker_step")]
    pub worker_step: String,
    /// Whether the input is split into partitions.
    #[serde(default = "default_partitioned")]
    pub partitioned: bool,
    /// File pattern used to expand an input directory.
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    /// Chunk loop configuration.
    #[serde(default)]
    pub step: StepConfig,
    /// Skip policy of every step.
    #[serde(default)]
    pub skip_policy: SkipPolicy,
}

impl JobDefinition {
    /// A partitioned job with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manager_step: default_manager_step(),
            worker_step: default_worker_step(),
            partitioned: default_partitioned(),
            file_pattern: default_file_pattern(),
            step: StepConfig::default(),
            skip_policy: SkipPolicy::default(),
        }
    }

    /// Sets the chunk loop configuration.
    #[must_use]
    pub fn with_step_config(mut self, step: StepConfig) -> Self {
        self.step = step;
        self
    }

    /// Sets the skip policy.
    #[must_use]
    pub fn with_skip_policy(mut self, skip_policy: SkipPolicy) -> Self {
        self.skip_policy = skip_policy;
        self
    }

    /// Enables or disables partitioning.
    #[must_use]
    pub fn with_partitioning(mut self, partitioned: bool) -> Self {
        self.partitioned = partitioned;
        self
    }

    /// Sets the directory file pattern.
    #[must_use]
    pub fn with_file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = pattern.into();
        self
    }

    /// Sets the manager and worker step names.
    #[must_use]
    pub fn with_step_names(mut self, manager: impl Into<String>, worker: impl Into<String>) -> Self {
        self.manager_step = manager.into();
        self.worker_step = worker.into();
        self
    }

    /// Step name of the partition called `partition`.
    #[must_use]
    pub fn worker_step_name(&self, partition: &str) -> String {
        format!("{}:{partition}", self.worker_step)
    }

    /// Partition name recovered from a worker step name.
    #[must_use]
    pub fn partition_name<'a>(&self, step_name: &'a str) -> Option<&'a str> {
        step_name
            .strip_prefix(self.worker_step.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }
}
