//! Chunk-oriented step execution.
//!
//! A step repeatedly reads records, transforms them, and writes them in
//! chunks. Faulty records are classified by the step's
//! [`SkipClassifier`](crate::skip::SkipClassifier) and either skipped or made
//! fatal. Steps move `PENDING -> RUNNING -> {COMPLETED | FAILED}`.

mod executor;
#[cfg(test)]
mod executor_tests;
mod listener;

pub use executor::ChunkExecutor;
pub use listener::{ChunkListener, LoggingChunkListener};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::{StepExecution, StepStatus};
use crate::errors::{BatchError, Result};
use crate::io::{RecordSink, RecordSource, RecordTransform};
use crate::skip::SkipClassifier;

fn default_chunk_size() -> usize {
    2
}

/// Configuration of the chunk loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Consumed records per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Retry a failed chunk write item by item to isolate bad items.
    #[serde(default)]
    pub isolate_write_failures: bool,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            isolate_write_failures: false,
        }
    }
}

impl StepConfig {
    /// Sets the chunk size (at least 1).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Enables or disables item-level write isolation.
    #[must_use]
    pub fn with_write_isolation(mut self, enabled: bool) -> Self {
        self.isolate_write_failures = enabled;
        self
    }

    /// Rejects a configuration the chunk loop cannot run with.
    ///
    /// Deserialized configurations are not clamped by [`Self::with_chunk_size`].
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(BatchError::configuration("chunk_size must be at least 1"));
        }
        Ok(())
    }
}

/// The collaborators of one step run.
pub struct StepResources<I> {
    /// Where records come from.
    pub source: Box<dyn RecordSource>,
    /// Record to item conversion.
    pub transform: Arc<dyn RecordTransform<I>>,
    /// Where chunks go.
    pub sink: Arc<dyn RecordSink<I>>,
    /// Skip policy plus error sink.
    pub classifier: SkipClassifier<I>,
}

/// The terminal state of a step run.
#[derive(Debug)]
pub struct StepOutcome {
    /// The final step execution.
    pub execution: StepExecution,
    /// The error that failed the step, if it failed.
    pub failure: Option<BatchError>,
}

impl StepOutcome {
    /// A completed outcome.
    #[must_use]
    pub fn completed(execution: StepExecution) -> Self {
        Self {
            execution,
            failure: None,
        }
    }

    /// A failed outcome.
    #[must_use]
    pub fn failed(execution: StepExecution, error: BatchError) -> Self {
        Self {
            execution,
            failure: Some(error),
        }
    }

    /// Returns true if the step completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.execution.status == StepStatus::Completed
    }

    /// The final status.
    #[must_use]
    pub fn status(&self) -> StepStatus {
        self.execution.status
    }
}
