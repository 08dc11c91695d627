//! Fault-tolerance policy.
//!
//! The [`SkipClassifier`] decides whether a failed record may be skipped. An
//! error is skippable only if its [`ErrorKind`] is in the policy's set and the
//! step's cumulative skip count stays within the limit; the budget is shared
//! by the read, process and write phases. Skipped records are written to the
//! step's [`ErrorSink`].

mod fields;

pub use fields::{FieldTable, NOT_AVAILABLE};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::{SkipPhase, StepExecution, SKIP_COUNTERS_KEY};
use crate::errors::{BatchError, ErrorKind};
use crate::io::{ErrorSink, RawRecord};

fn default_skippable() -> BTreeSet<ErrorKind> {
    [ErrorKind::Parse, ErrorKind::Validation].into_iter().collect()
}

fn default_skip_limit() -> u64 {
    2
}

/// Which errors may be skipped, and how many.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipPolicy {
    /// Error kinds that may be skipped.
    #[serde(default = "default_skippable")]
    pub skippable: BTreeSet<ErrorKind>,
    /// Maximum number of skips per step, across all phases.
    #[serde(default = "default_skip_limit")]
    pub skip_limit: u64,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self {
            skippable: default_skippable(),
            skip_limit: default_skip_limit(),
        }
    }
}

impl SkipPolicy {
    /// A policy that never skips.
    #[must_use]
    pub fn never() -> Self {
        Self {
            skippable: BTreeSet::new(),
            skip_limit: 0,
        }
    }

    /// Sets the skip limit.
    #[must_use]
    pub fn with_skip_limit(mut self, skip_limit: u64) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    /// Adds a skippable kind.
    #[must_use]
    pub fn with_skippable(mut self, kind: ErrorKind) -> Self {
        self.skippable.insert(kind);
        self
    }

    /// Returns true if errors of `kind` are eligible for skipping.
    #[must_use]
    pub fn is_skippable(&self, kind: ErrorKind) -> bool {
        self.skippable.contains(&kind)
    }
}

/// Descriptor of one skipped record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    /// Phase in which the record failed.
    pub phase: SkipPhase,
    /// Reconstructed field values, in declared order.
    pub fields: Vec<String>,
    /// The raw input line, when known.
    pub input: Option<String>,
    /// Line number in the input, when known.
    pub line_number: Option<usize>,
    /// The error message.
    pub message: String,
}

/// What failed: nothing but the error, the raw record, or the built item.
#[derive(Debug)]
pub enum SkipSubject<'a, I> {
    /// Only the error is available (read failures).
    Input,
    /// The tokenized record (process failures).
    Raw(&'a RawRecord),
    /// The transformed item (write failures).
    Item(&'a I),
}

/// The outcome of classifying a failure.
#[derive(Debug)]
pub enum SkipDecision {
    /// The record was skipped and recorded.
    Skip(SkipRecord),
    /// The step must fail with this error.
    Fail(BatchError),
}

impl SkipDecision {
    /// Returns true for [`SkipDecision::Skip`].
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

/// Applies a [`SkipPolicy`] to one step.
pub struct SkipClassifier<I> {
    policy: SkipPolicy,
    fields: FieldTable<I>,
    delimiter: char,
    error_sink: Arc<dyn ErrorSink>,
}

impl<I> std::fmt::Debug for SkipClassifier<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipClassifier")
            .field("policy", &self.policy)
            .field("fields", &self.fields)
            .field("delimiter", &self.delimiter)
            .finish_non_exhaustive()
    }
}

impl<I> SkipClassifier<I> {
    /// Creates a classifier.
    #[must_use]
    pub fn new(
        policy: SkipPolicy,
        fields: FieldTable<I>,
        delimiter: char,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            policy,
            fields,
            delimiter,
            error_sink,
        }
    }

    /// The policy in force.
    #[must_use]
    pub fn policy(&self) -> &SkipPolicy {
        &self.policy
    }

    /// Classifies `error`, raised in `phase` while handling `subject`.
    ///
    /// On skip the step's counters (and their context snapshot) are
    /// incremented and the record is sent to the error sink; sink failures
    /// are logged and swallowed. On fail the error is returned untouched,
    /// except when the skip budget is exhausted.
    pub async fn classify(
        &self,
        phase: SkipPhase,
        error: BatchError,
        subject: SkipSubject<'_, I>,
        step: &mut StepExecution,
    ) -> SkipDecision {
        if !self.policy.is_skippable(error.kind()) {
            debug!(step = %step.step_name, %phase, kind = %error.kind(), "Error is not skippable");
            return SkipDecision::Fail(error);
        }
        if step.skip_count() >= self.policy.skip_limit {
            warn!(
                step = %step.step_name,
                %phase,
                limit = self.policy.skip_limit,
                error = %error,
                "Skip limit exceeded"
            );
            return SkipDecision::Fail(BatchError::SkipLimitExceeded {
                limit: self.policy.skip_limit,
                phase: phase.to_string(),
                cause: error.to_string(),
            });
        }

        step.skips.increment(phase);
        step.context.put(SKIP_COUNTERS_KEY, step.skips);

        let record = self.build_record(phase, &error, subject);
        info!(
            step = %step.step_name,
            %phase,
            line = ?record.line_number,
            error = %record.message,
            "Skipping {phase} due to error"
        );
        if let Err(sink_err) = self.error_sink.append(&record).await {
            warn!(
                step = %step.step_name,
                subject = ?record.fields,
                error = %sink_err,
                "Failed to write error record"
            );
        }
        SkipDecision::Skip(record)
    }

    fn build_record(
        &self,
        phase: SkipPhase,
        error: &BatchError,
        subject: SkipSubject<'_, I>,
    ) -> SkipRecord {
        let (fields, input, line_number) = match subject {
            SkipSubject::Input => match error {
                BatchError::Parse(parse) => (
                    parse.input.as_deref().map_or_else(
                        || self.fields.not_available(),
                        |raw| self.fields.values_from_raw(raw, self.delimiter),
                    ),
                    parse.input.clone(),
                    parse.line_number,
                ),
                _ => (self.fields.not_available(), None, None),
            },
            SkipSubject::Raw(record) => (
                self.fields.values_from_tokens(&record.fields),
                Some(record.line.clone()),
                Some(record.line_number),
            ),
            SkipSubject::Item(item) => (self.fields.values(item), None, None),
        };
        SkipRecord {
            phase,
            fields,
            input,
            line_number,
            message: error.to_string(),
        }
    }
}
