//! Engine configuration with defaults and environment overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{BatchError, Result};
use crate::skip::SkipPolicy;
use crate::step::StepConfig;

fn default_chunk_size() -> usize {
    2
}

fn default_skip_limit() -> u64 {
    2
}

fn default_concurrency() -> usize {
    2
}

fn default_delimiter() -> char {
    ';'
}

fn default_lines_to_skip() -> usize {
    1
}

fn default_file_pattern() -> String {
    "*.csv".to_string()
}

fn default_error_file_suffix() -> String {
    "-errors.csv".to_string()
}

fn default_state_db() -> PathBuf {
    PathBuf::from("batchflow-state.db")
}

/// Settings shared by the engine and its binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Consumed records per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Skips allowed per step.
    #[serde(default = "default_skip_limit")]
    pub skip_limit: u64,
    /// Partitions run at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Field delimiter of input and error files.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Header lines at the top of each input file.
    #[serde(default = "default_lines_to_skip")]
    pub lines_to_skip: usize,
    /// Pattern selecting files in an input directory.
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    /// Suffix of error files, replacing the input extension.
    #[serde(default = "default_error_file_suffix")]
    pub error_file_suffix: String,
    /// Retry failed chunk writes item by item.
    #[serde(default)]
    pub isolate_write_failures: bool,
    /// Execution state database.
    #[serde(default = "default_state_db")]
    pub state_db: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            skip_limit: default_skip_limit(),
            concurrency: default_concurrency(),
            delimiter: default_delimiter(),
            lines_to_skip: default_lines_to_skip(),
            file_pattern: default_file_pattern(),
            error_file_suffix: default_error_file_suffix(),
            isolate_write_failures: false,
            state_db: default_state_db(),
        }
    }
}

impl BatchConfig {
    /// Defaults overlaid with `BATCHFLOW_*` environment variables.
    ///
    /// Recognized: `BATCHFLOW_CHUNK_SIZE`, `BATCHFLOW_SKIP_LIMIT`,
    /// `BATCHFLOW_CONCURRENCY`, `BATCHFLOW_DELIMITER`,
    /// `BATCHFLOW_LINES_TO_SKIP`, `BATCHFLOW_FILE_PATTERN`,
    /// `BATCHFLOW_ERROR_FILE_SUFFIX`, `BATCHFLOW_ISOLATE_WRITE_FAILURES`,
    /// `BATCHFLOW_STATE_DB`.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides looked up by variable name.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("BATCHFLOW_CHUNK_SIZE") {
            self.chunk_size = parse_var("BATCHFLOW_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("BATCHFLOW_SKIP_LIMIT") {
            self.skip_limit = parse_var("BATCHFLOW_SKIP_LIMIT", &v)?;
        }
        if let Some(v) = lookup("BATCHFLOW_CONCURRENCY") {
            self.concurrency = parse_var("BATCHFLOW_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("BATCHFLOW_DELIMITER") {
            self.delimiter = parse_var("BATCHFLOW_DELIMITER", &v)?;
        }
        if let Some(v) = lookup("BATCHFLOW_LINES_TO_SKIP") {
            self.lines_to_skip = parse_var("BATCHFLOW_LINES_TO_SKIP", &v)?;
        }
        if let Some(v) = lookup("BATCHFLOW_FILE_PATTERN") {
            self.file_pattern = v;
        }
        if let Some(v) = lookup("BATCHFLOW_ERROR_FILE_SUFFIX") {
            self.error_file_suffix = v;
        }
        if let Some(v) = lookup("BATCHFLOW_ISOLATE_WRITE_FAILURES") {
            self.isolate_write_failures = parse_var("BATCHFLOW_ISOLATE_WRITE_FAILURES", &v)?;
        }
        if let Some(v) = lookup("BATCHFLOW_STATE_DB") {
            self.state_db = PathBuf::from(v);
        }
        Ok(self)
    }

    /// Sets the chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the skip limit.
    #[must_use]
    pub fn with_skip_limit(mut self, skip_limit: u64) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Enables or disables item-level write isolation.
    #[must_use]
    pub fn with_write_isolation(mut self, enabled: bool) -> Self {
        self.isolate_write_failures = enabled;
        self
    }

    /// Sets the state database path.
    #[must_use]
    pub fn with_state_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_db = path.into();
        self
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(BatchError::configuration("chunk_size must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(BatchError::configuration("concurrency must be at least 1"));
        }
        if self.file_pattern.is_empty() {
            return Err(BatchError::configuration("file_pattern must not be empty"));
        }
        Ok(())
    }

    /// The chunk loop configuration.
    #[must_use]
    pub fn step_config(&self) -> StepConfig {
        StepConfig::default()
            .with_chunk_size(self.chunk_size)
            .with_write_isolation(self.isolate_write_failures)
    }

    /// The default skip policy with this skip limit.
    #[must_use]
    pub fn skip_policy(&self) -> SkipPolicy {
        SkipPolicy::default().with_skip_limit(self.skip_limit)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| BatchError::configuration(format!("{name}='{value}': {e}")))
}
