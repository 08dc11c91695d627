//! Error types for the batchflow engine.
//!
//! Every failure that can reach a step is a [`BatchError`]. The skip policy
//! never inspects error messages: it looks at [`BatchError::kind`], so the
//! original error travels untouched from the point of failure to the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::core::BatchStatus;

/// Coarse classification of a [`BatchError`], used by skip policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing job input specification.
    Configuration,
    /// An input resource is missing or unreadable.
    Resource,
    /// A record could not be tokenized or converted.
    Parse,
    /// A record was rejected by a business rule.
    Validation,
    /// The destination refused a write.
    Sink,
    /// The skip budget of a step is exhausted.
    SkipLimitExceeded,
    /// A completed job instance was launched again.
    AlreadyCompleted,
    /// The job instance is already running in this process.
    AlreadyRunning,
    /// The execution state store failed.
    State,
    /// Low level I/O failure.
    Io,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Resource => "resource",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Sink => "sink",
            Self::SkipLimitExceeded => "skip_limit_exceeded",
            Self::AlreadyCompleted => "already_completed",
            Self::AlreadyRunning => "already_running",
            Self::State => "state",
            Self::Io => "io",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The main error type for batchflow operations.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The job input specification is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An input resource does not exist or cannot be opened.
    #[error("Resource error: {message}")]
    Resource {
        /// The resource path.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// A record could not be parsed.
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// A record was rejected by a business rule.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The record sink failed to write a chunk.
    #[error("Sink error: {0}")]
    Sink(String),

    /// The skip limit of a step was exceeded.
    #[error("Skip limit of {limit} exceeded ({phase} phase): {cause}")]
    SkipLimitExceeded {
        /// The configured limit.
        limit: u64,
        /// The phase of the skip that broke the budget.
        phase: String,
        /// Message of the triggering error.
        cause: String,
    },

    /// A job instance with a completed execution was launched again.
    #[error("{0}")]
    AlreadyCompleted(#[from] AlreadyCompletedError),

    /// The job instance is already running in this process.
    #[error("Job '{job}' is already running (instance key {key})")]
    AlreadyRunning {
        /// Job name.
        job: String,
        /// Identity key.
        key: String,
    },

    /// The execution state store failed.
    #[error("{0}")]
    State(#[from] StateError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a resource error.
    #[must_use]
    pub fn resource(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resource {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a sink error.
    #[must_use]
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink(message.into())
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Resource { .. } => ErrorKind::Resource,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Sink(_) => ErrorKind::Sink,
            Self::SkipLimitExceeded { .. } => ErrorKind::SkipLimitExceeded,
            Self::AlreadyCompleted(_) => ErrorKind::AlreadyCompleted,
            Self::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            Self::State(_) => ErrorKind::State,
            Self::Io(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the raw input line when this is a parse error.
    #[must_use]
    pub fn raw_input(&self) -> Option<&str> {
        match self {
            Self::Parse(err) => err.input.as_deref(),
            _ => None,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind().to_string()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Some(input) = self.raw_input() {
            map.insert("input".to_string(), serde_json::json!(input));
        }
        map
    }
}

/// Error raised when a record cannot be tokenized or converted.
#[derive(Debug, Clone, Error)]
pub struct ParseError {
    /// Human readable reason.
    pub message: String,
    /// The raw input line, when known.
    pub input: Option<String>,
    /// 1-based line number in the input resource, when known.
    pub line_number: Option<usize>,
}

impl ParseError {
    /// Creates a new parse error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            input: None,
            line_number: None,
        }
    }

    /// Sets the raw input.
    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Sets the line number.
    #[must_use]
    pub fn with_line_number(mut self, line_number: usize) -> Self {
        self.line_number = Some(line_number);
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line_number, &self.input) {
            (Some(line), Some(input)) => write!(
                f,
                "Parsing error at line {line}, input=[{input}]: {}",
                self.message
            ),
            (Some(line), None) => write!(f, "Parsing error at line {line}: {}", self.message),
            _ => write!(f, "Parsing error: {}", self.message),
        }
    }
}

/// Error raised when a job instance that already completed is launched again.
#[derive(Debug, Clone, Error)]
#[error("A job instance already exists and is complete for job '{job}' (instance key {key}). Change the parameters to run it again.")]
pub struct AlreadyCompletedError {
    /// Job name.
    pub job: String,
    /// Identity key of the instance.
    pub key: String,
    /// Status of the latest execution.
    pub status: BatchStatus,
}

impl AlreadyCompletedError {
    /// Creates a new already-completed error.
    #[must_use]
    pub fn new(job: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            key: key.into(),
            status: BatchStatus::Completed,
        }
    }
}

/// Errors produced by execution state stores.
#[derive(Debug, Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Context (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity name.
        entity: &'static str,
        /// Identifier.
        id: i64,
    },

    /// A unique key was violated.
    #[error("{0}")]
    Conflict(String),
}

impl StateError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

/// Convenience alias for store results.
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Convenience alias for engine results.
pub type Result<T> = std::result::Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(BatchError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(BatchError::sink("x").kind(), ErrorKind::Sink);
        assert_eq!(
            BatchError::from(ParseError::new("bad")).kind(),
            ErrorKind::Parse
        );
        assert_eq!(
            BatchError::configuration("missing").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            BatchError::resource("/tmp/x", "does not exist").kind(),
            ErrorKind::Resource
        );
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new("expected 3 fields, found 2")
            .with_input("john;doe")
            .with_line_number(4);
        let msg = err.to_string();
        assert!(msg.contains("line 4"), "got: {msg}");
        assert!(msg.contains("john;doe"), "got: {msg}");
    }

    #[test]
    fn test_raw_input_only_for_parse() {
        let err = BatchError::from(ParseError::new("bad").with_input("a;b"));
        assert_eq!(err.raw_input(), Some("a;b"));
        assert_eq!(BatchError::validation("must be born").raw_input(), None);
    }

    #[test]
    fn test_already_completed_is_distinct() {
        let err: BatchError = AlreadyCompletedError::new("importUserJob", "abc").into();
        assert_eq!(err.kind(), ErrorKind::AlreadyCompleted);
        assert!(err.to_string().contains("importUserJob"));
    }

    #[test]
    fn test_state_error_wraps() {
        let err: BatchError = StateError::not_found("job execution", 7).into();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(err.to_string(), "job execution 7 not found");
    }

    #[test]
    fn test_to_dict() {
        let dict = BatchError::from(ParseError::new("bad").with_input("x;y")).to_dict();
        assert_eq!(dict.get("kind").unwrap(), "parse");
        assert_eq!(dict.get("input").unwrap(), "x;y");
    }
}
