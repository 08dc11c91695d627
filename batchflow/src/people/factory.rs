//! Opening the resources of a people import step.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::{person_fields, NationalIdLookup, Person, PersonTransform};
use crate::config::BatchConfig;
use crate::core::{StepExecution, ERROR_FILE_KEY, INPUT_FILE_KEY};
use crate::errors::{BatchError, Result};
use crate::io::{CsvErrorSink, DelimitedFileSource, LineTokenizer, RecordSink};
use crate::job::StepFactory;
use crate::skip::{SkipClassifier, SkipPolicy};
use crate::step::StepResources;

/// Builds people steps from the `input.file` and `output.error.file`
/// context keys.
#[derive(Clone)]
pub struct PeopleStepFactory {
    sink: Arc<dyn RecordSink<Person>>,
    transform: PersonTransform,
    delimiter: char,
    lines_to_skip: usize,
}

impl std::fmt::Debug for PeopleStepFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeopleStepFactory")
            .field("transform", &self.transform)
            .field("delimiter", &self.delimiter)
            .field("lines_to_skip", &self.lines_to_skip)
            .finish_non_exhaustive()
    }
}

impl PeopleStepFactory {
    /// Creates a factory writing to `sink`, reading `;`-delimited files with one header line.
    #[must_use]
    pub fn new(sink: Arc<dyn RecordSink<Person>>) -> Self {
        Self {
            sink,
            transform: PersonTransform::new(),
            delimiter: ';',
            lines_to_skip: 1,
        }
    }

    /// Creates a factory using the file format of `config`.
    #[must_use]
    pub fn from_config(config: &BatchConfig, sink: Arc<dyn RecordSink<Person>>) -> Self {
        Self::new(sink)
            .with_delimiter(config.delimiter)
            .with_lines_to_skip(config.lines_to_skip)
    }

    /// Sets the field delimiter.
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Sets the number of header lines.
    #[must_use]
    pub fn with_lines_to_skip(mut self, lines: usize) -> Self {
        self.lines_to_skip = lines;
        self
    }

    /// Enriches persons through `lookup`.
    #[must_use]
    pub fn with_lookup(mut self, lookup: Arc<dyn NationalIdLookup>) -> Self {
        self.transform = self.transform.with_lookup(lookup);
        self
    }

    fn context_path(step: &StepExecution, key: &str) -> Result<PathBuf> {
        step.context
            .get_string(key)
            .map(PathBuf::from)
            .ok_or_else(|| {
                BatchError::configuration(format!(
                    "step '{}' has no '{key}' in its execution context",
                    step.step_name
                ))
            })
    }
}

#[async_trait]
impl StepFactory for PeopleStepFactory {
    type Item = Person;

    async fn open(&self, step: &StepExecution, policy: &SkipPolicy) -> Result<StepResources<Person>> {
        let input = Self::context_path(step, INPUT_FILE_KEY)?;
        let error_file = Self::context_path(step, ERROR_FILE_KEY)?;
        let fields = person_fields();

        let source = DelimitedFileSource::open(
            &input,
            LineTokenizer::new(self.delimiter, fields.len()),
            self.lines_to_skip,
        )
        .await?;
        let error_sink = CsvErrorSink::new(&error_file, &fields.names(), self.delimiter);
        debug!(
            step = %step.step_name,
            input = %input.display(),
            errors = %error_file.display(),
            "Opened people step"
        );

        Ok(StepResources {
            source: Box::new(source),
            transform: Arc::new(self.transform.clone()),
            sink: self.sink.clone(),
            classifier: SkipClassifier::new(
                policy.clone(),
                fields,
                self.delimiter,
                Arc::new(error_sink),
            ),
        })
    }
}
