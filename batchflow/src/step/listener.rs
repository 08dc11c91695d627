//! Chunk lifecycle hooks.

use tracing::{debug, error, info};

use crate::core::StepExecution;
use crate::errors::BatchError;
use crate::skip::SkipRecord;

/// Callbacks invoked synchronously at chunk boundaries and on skips.
///
/// Every method defaults to a no-op.
pub trait ChunkListener: Send + Sync {
    /// Called before a chunk starts reading.
    fn before_chunk(&self, _step: &StepExecution) {}

    /// Called after a chunk was written and checkpointed.
    fn after_chunk(&self, _step: &StepExecution) {}

    /// Called after a chunk was rolled back.
    fn after_chunk_error(&self, _step: &StepExecution, _error: &BatchError) {}

    /// Called after a record was skipped and recorded.
    fn on_skip(&self, _step: &StepExecution, _record: &SkipRecord) {}
}

/// Logs chunk boundaries through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingChunkListener;

impl ChunkListener for LoggingChunkListener {
    fn before_chunk(&self, step: &StepExecution) {
        debug!(
            step = %step.step_name,
            commit = step.commit_count + 1,
            offset = step.resume_offset(),
            "beforeChunk"
        );
    }

    fn after_chunk(&self, step: &StepExecution) {
        info!(
            step = %step.step_name,
            commit = step.commit_count,
            read = step.read_count,
            written = step.write_count,
            skipped = step.skip_count(),
            "afterChunk"
        );
    }

    fn after_chunk_error(&self, step: &StepExecution, error: &BatchError) {
        error!(
            step = %step.step_name,
            rollbacks = step.rollback_count,
            error = %error,
            "afterChunkError"
        );
    }
}
