//! Record I/O capabilities consumed by the chunk executor.
//!
//! A step reads [`RawRecord`]s from a [`RecordSource`], turns each into an
//! item with a [`RecordTransform`], writes items in chunks to a
//! [`RecordSink`] and reports skipped records to an [`ErrorSink`].

mod delimited;
mod error_sink;
mod memory;

pub use delimited::{DelimitedFileSource, LineTokenizer};
pub use error_sink::CsvErrorSink;
pub use memory::{CollectingErrorSink, CollectingSink, VecSource};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::skip::SkipRecord;

/// One tokenized input record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 0-based position among the consumed records of the resource.
    pub offset: u64,
    /// 1-based line number in the resource.
    pub line_number: usize,
    /// The raw line.
    pub line: String,
    /// Tokenized fields.
    pub fields: Vec<String>,
}

impl RawRecord {
    /// Returns the field at `index`.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

/// A resumable stream of raw records.
#[async_trait]
pub trait RecordSource: Send {
    /// Returns the next record, or `None` at end of input.
    ///
    /// A record that fails to tokenize is still consumed: the offset
    /// advances and the error is returned for classification.
    async fn next(&mut self) -> Result<Option<RawRecord>>;

    /// Skips ahead so that the next record read is the one at `offset`.
    async fn seek(&mut self, offset: u64) -> Result<()>;

    /// Number of records consumed so far.
    fn current_offset(&self) -> u64;
}

/// Converts a raw record into an item.
#[async_trait]
pub trait RecordTransform<I>: Send + Sync {
    /// Applies the transform.
    async fn apply(&self, record: &RawRecord) -> Result<I>;
}

/// All-or-nothing destination for chunks of items.
#[async_trait]
pub trait RecordSink<I>: Send + Sync {
    /// Writes every item or none of them.
    async fn write_all(&self, items: &[I]) -> Result<()>;
}

/// Durable record of skipped inputs.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    /// Appends one skip record.
    async fn append(&self, record: &SkipRecord) -> Result<()>;
}
