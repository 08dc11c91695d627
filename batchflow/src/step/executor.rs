//! The read-process-write chunk loop.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::listener::ChunkListener;
use super::{StepConfig, StepOutcome, StepResources};
use crate::core::{SkipPhase, StepExecution, StepStatus, READ_OFFSET_KEY, SKIP_COUNTERS_KEY};
use crate::errors::{BatchError, Result};
use crate::io::{RecordSink, RecordSource, RecordTransform};
use crate::skip::{SkipClassifier, SkipDecision, SkipRecord, SkipSubject};
use crate::state::ExecutionStateStore;

/// Progress of one chunk before it is committed.
#[derive(Debug, Clone, Copy, Default)]
struct ChunkProgress {
    consumed: u64,
    exhausted: bool,
}

/// Drives one step to completion by filling and committing chunks.
///
/// A chunk covers `chunk_size` consumed records. Each committed chunk is
/// checkpointed to the state store (counters, resume offset and skip
/// counters) before the next one starts. A failed chunk is rolled back in
/// memory, so the persisted step always reflects the last commit.
pub struct ChunkExecutor {
    store: Arc<dyn ExecutionStateStore>,
    config: StepConfig,
    listeners: Vec<Arc<dyn ChunkListener>>,
}

impl std::fmt::Debug for ChunkExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkExecutor")
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl ChunkExecutor {
    /// Creates an executor persisting to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ExecutionStateStore>, config: StepConfig) -> Self {
        Self {
            store,
            config,
            listeners: Vec::new(),
        }
    }

    /// Registers a chunk listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ChunkListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// The step configuration.
    #[must_use]
    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    /// Runs `step` to a terminal state.
    pub async fn run<I>(&self, mut step: StepExecution, resources: StepResources<I>) -> StepOutcome
    where
        I: Send + Sync + 'static,
    {
        if step.status == StepStatus::Completed {
            debug!(step = %step.step_name, "Step already complete, nothing to do");
            return StepOutcome::completed(step);
        }
        if let Err(err) = self.config.validate() {
            return self.fail(step, err).await;
        }
        let StepResources {
            mut source,
            transform,
            sink,
            classifier,
        } = resources;

        if let Err(err) = step.transition(StepStatus::Running) {
            return self.fail(step, err).await;
        }
        step.exit_message = None;
        if let Err(err) = self.store.update_step_execution(&step).await {
            return self.fail(step, err.into()).await;
        }

        let offset = step.resume_offset();
        if offset > 0 {
            info!(step = %step.step_name, offset, "Resuming step at committed offset");
            if let Err(err) = source.seek(offset).await {
                return self.fail(step, err).await;
            }
        }

        loop {
            let snapshot = step.counts();
            let context_snapshot = step.context.clone();
            self.notify(|l| l.before_chunk(&step));

            let progress = self
                .fill_and_write(
                    &mut step,
                    source.as_mut(),
                    transform.as_ref(),
                    sink.as_ref(),
                    &classifier,
                )
                .await;

            let progress = match progress {
                Ok(progress) => progress,
                Err(err) => {
                    step.restore_counts(snapshot);
                    step.context = context_snapshot;
                    step.rollback_count += 1;
                    self.notify(|l| l.after_chunk_error(&step, &err));
                    return self.fail(step, err).await;
                }
            };

            if progress.consumed == 0 {
                break;
            }

            step.commit_count += 1;
            step.context.put(READ_OFFSET_KEY, source.current_offset());
            step.context.put(SKIP_COUNTERS_KEY, step.skips);
            if let Err(err) = self.store.update_step_execution(&step).await {
                step.restore_counts(snapshot);
                step.context = context_snapshot;
                step.commit_count -= 1;
                step.rollback_count += 1;
                return self.fail(step, err.into()).await;
            }
            let delta = step.counts().since(&snapshot);
            if let Err(err) = self.store.add_job_counts(step.job_execution_id, delta).await {
                warn!(step = %step.step_name, error = %err, "Failed to update job counters");
            }
            debug!(
                step = %step.step_name,
                commit = step.commit_count,
                offset = source.current_offset(),
                read = step.read_count,
                written = step.write_count,
                skipped = step.skip_count(),
                "Committed chunk"
            );
            self.notify(|l| l.after_chunk(&step));

            if progress.exhausted {
                break;
            }
        }

        let mut finished = step.clone();
        if let Err(err) = finished.transition(StepStatus::Completed) {
            return self.fail(step, err).await;
        }
        if let Err(err) = self.store.update_step_execution(&finished).await {
            return self.fail(step, err.into()).await;
        }
        info!(
            step = %finished.step_name,
            read = finished.read_count,
            written = finished.write_count,
            skipped = finished.skip_count(),
            commits = finished.commit_count,
            "Step completed"
        );
        StepOutcome::completed(finished)
    }

    /// Reads, transforms and writes one chunk.
    async fn fill_and_write<I>(
        &self,
        step: &mut StepExecution,
        source: &mut dyn RecordSource,
        transform: &dyn RecordTransform<I>,
        sink: &dyn RecordSink<I>,
        classifier: &SkipClassifier<I>,
    ) -> Result<ChunkProgress>
    where
        I: Send + Sync + 'static,
    {
        let chunk_size = self.config.chunk_size as u64;
        let mut items = Vec::with_capacity(self.config.chunk_size);
        let mut progress = ChunkProgress::default();

        while progress.consumed < chunk_size {
            let before = source.current_offset();
            match source.next().await {
                Ok(None) => {
                    progress.exhausted = true;
                    break;
                }
                Ok(Some(raw)) => {
                    progress.consumed += 1;
                    step.read_count += 1;
                    match transform.apply(&raw).await {
                        Ok(item) => items.push(item),
                        Err(err) => {
                            let decision = classifier
                                .classify(SkipPhase::Process, err, SkipSubject::Raw(&raw), step)
                                .await;
                            self.on_decision(step, decision)?;
                        }
                    }
                }
                Err(err) => {
                    // A read error that did not consume a record cannot be skipped.
                    if source.current_offset() == before {
                        return Err(err);
                    }
                    progress.consumed += 1;
                    step.read_count += 1;
                    let decision = classifier
                        .classify(SkipPhase::Read, err, SkipSubject::Input, step)
                        .await;
                    self.on_decision(step, decision)?;
                }
            }
        }

        if items.is_empty() {
            return Ok(progress);
        }
        match sink.write_all(&items).await {
            Ok(()) => {
                step.write_count += items.len() as u64;
                Ok(progress)
            }
            Err(err)
                if self.config.isolate_write_failures
                    && classifier.policy().is_skippable(err.kind()) =>
            {
                warn!(
                    step = %step.step_name,
                    items = items.len(),
                    error = %err,
                    "Chunk write failed, retrying item by item"
                );
                self.write_each(step, &items, sink, classifier).await?;
                Ok(progress)
            }
            Err(err) => Err(err),
        }
    }

    /// Writes items one at a time, skipping those that fail on their own.
    async fn write_each<I>(
        &self,
        step: &mut StepExecution,
        items: &[I],
        sink: &dyn RecordSink<I>,
        classifier: &SkipClassifier<I>,
    ) -> Result<()>
    where
        I: Send + Sync + 'static,
    {
        for item in items {
            match sink.write_all(std::slice::from_ref(item)).await {
                Ok(()) => step.write_count += 1,
                Err(err) => {
                    let decision = classifier
                        .classify(SkipPhase::Write, err, SkipSubject::Item(item), step)
                        .await;
                    self.on_decision(step, decision)?;
                }
            }
        }
        Ok(())
    }

    fn on_decision(&self, step: &StepExecution, decision: SkipDecision) -> Result<SkipRecord> {
        match decision {
            SkipDecision::Skip(record) => {
                self.notify(|l| l.on_skip(step, &record));
                Ok(record)
            }
            SkipDecision::Fail(err) => Err(err),
        }
    }

    async fn fail(&self, mut step: StepExecution, err: BatchError) -> StepOutcome {
        step.exit_message = Some(err.to_string());
        if step.status.can_transition_to(StepStatus::Failed) {
            let _ = step.transition(StepStatus::Failed);
        }
        if let Err(state_err) = self.store.update_step_execution(&step).await {
            error!(
                step = %step.step_name,
                error = %state_err,
                "Failed to persist failed step"
            );
        }
        error!(
            step = %step.step_name,
            read = step.read_count,
            written = step.write_count,
            skipped = step.skip_count(),
            error = %err,
            "Step failed"
        );
        StepOutcome::failed(step, err)
    }

    fn notify(&self, f: impl Fn(&dyn ChunkListener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }
}
