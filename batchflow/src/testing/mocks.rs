//! Mock sinks and listeners for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::StepExecution;
use crate::errors::{BatchError, Result};
use crate::io::{CollectingSink, RecordSink};
use crate::skip::SkipRecord;
use crate::step::ChunkListener;

/// How a [`FlakySink`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFailure {
    /// A non-skippable sink error.
    Sink,
    /// A skippable validation error.
    Validation,
}

impl SinkFailure {
    fn to_error(self, message: String) -> BatchError {
        match self {
            Self::Sink => BatchError::sink(message),
            Self::Validation => BatchError::validation(message),
        }
    }
}

type Predicate<I> = Box<dyn Fn(&I) -> bool + Send + Sync>;

/// A sink that fails selected calls or items, and collects the rest.
pub struct FlakySink<I> {
    inner: CollectingSink<I>,
    failing_calls: BTreeSet<usize>,
    failing_items: Option<Predicate<I>>,
    failure: SinkFailure,
    calls: Mutex<usize>,
}

impl<I: Clone + Send + Sync> FlakySink<I> {
    /// Creates a sink that never fails.
    #[must_use]
    pub fn new(failure: SinkFailure) -> Self {
        Self {
            inner: CollectingSink::new(),
            failing_calls: BTreeSet::new(),
            failing_items: None,
            failure,
            calls: Mutex::new(0),
        }
    }

    /// Fails the write call with the given 1-based number.
    #[must_use]
    pub fn fail_on_call(mut self, call: usize) -> Self {
        self.failing_calls.insert(call);
        self
    }

    /// Fails any write containing an item matching `predicate`.
    #[must_use]
    pub fn fail_items(mut self, predicate: impl Fn(&I) -> bool + Send + Sync + 'static) -> Self {
        self.failing_items = Some(Box::new(predicate));
        self
    }

    /// Successfully written items.
    #[must_use]
    pub fn items(&self) -> Vec<I> {
        self.inner.items()
    }

    /// Number of write calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl<I: Clone + Send + Sync> RecordSink<I> for FlakySink<I> {
    async fn write_all(&self, items: &[I]) -> Result<()> {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        if self.failing_calls.contains(&call) {
            return Err(self.failure.to_error(format!("write call {call} rejected")));
        }
        if let Some(predicate) = &self.failing_items {
            if items.iter().any(|item| predicate(item)) {
                return Err(self.failure.to_error("item rejected by sink".to_string()));
            }
        }
        self.inner.write_all(items).await
    }
}

/// Records chunk events and checks count conservation at every commit.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
    violations: Mutex<Vec<String>>,
}

impl RecordingListener {
    /// Creates a listener.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Recorded events, in order.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Commits at which `read != write + skip`.
    #[must_use]
    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }
}

impl ChunkListener for RecordingListener {
    fn before_chunk(&self, step: &StepExecution) {
        self.events.lock().push(format!("before:{}", step.commit_count));
    }

    fn after_chunk(&self, step: &StepExecution) {
        self.events.lock().push(format!("after:{}", step.commit_count));
        if step.read_count != step.write_count + step.skip_count() {
            self.violations.lock().push(format!(
                "{} commit {}: read={} write={} skip={}",
                step.step_name,
                step.commit_count,
                step.read_count,
                step.write_count,
                step.skip_count()
            ));
        }
    }

    fn after_chunk_error(&self, step: &StepExecution, _error: &BatchError) {
        self.events.lock().push(format!("error:{}", step.commit_count));
    }

    fn on_skip(&self, _step: &StepExecution, record: &SkipRecord) {
        self.events.lock().push(format!("skip:{}", record.phase));
    }
}
