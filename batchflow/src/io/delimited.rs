//! Delimited text reading.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::{RawRecord, RecordSource};
use crate::errors::{BatchError, ParseError, Result};

/// Splits a line into a fixed number of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTokenizer {
    delimiter: char,
    columns: usize,
}

impl LineTokenizer {
    /// Creates a tokenizer expecting exactly `columns` fields.
    #[must_use]
    pub fn new(delimiter: char, columns: usize) -> Self {
        Self { delimiter, columns }
    }

    /// The delimiter.
    #[must_use]
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Tokenizes `line`, failing when the field count does not match.
    pub fn tokenize(
        &self,
        line: &str,
        line_number: usize,
        offset: u64,
    ) -> std::result::Result<RawRecord, ParseError> {
        let fields: Vec<String> = line.split(self.delimiter).map(str::to_string).collect();
        if fields.len() != self.columns {
            return Err(ParseError::new(format!(
                "Incorrect number of tokens found in record: expected {} actual {}",
                self.columns,
                fields.len()
            ))
            .with_input(line)
            .with_line_number(line_number));
        }
        Ok(RawRecord {
            offset,
            line_number,
            line: line.to_string(),
            fields,
        })
    }
}

/// One physical line of input.
#[derive(Debug)]
enum Line {
    Text(String),
    /// Not valid UTF-8; holds a lossy rendering.
    Invalid(String),
}

impl Line {
    fn is_blank(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Invalid(_) => false,
        }
    }
}

/// Reads records from a delimited text file.
///
/// Leading header lines are skipped on open and blank lines are ignored;
/// neither counts toward the offset. A line that is not valid UTF-8 is
/// consumed and reported as a parse error.
pub struct DelimitedFileSource {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
    tokenizer: LineTokenizer,
    line_number: usize,
    offset: u64,
}

impl std::fmt::Debug for DelimitedFileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelimitedFileSource")
            .field("path", &self.path)
            .field("line_number", &self.line_number)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl DelimitedFileSource {
    /// Opens `path` and skips `lines_to_skip` header lines.
    pub async fn open(
        path: impl AsRef<Path>,
        tokenizer: LineTokenizer,
        lines_to_skip: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|e| {
            BatchError::resource(
                path.display().to_string(),
                format!("cannot open input {}: {e}", path.display()),
            )
        })?;
        let mut source = Self {
            path,
            reader: BufReader::new(file),
            buf: Vec::new(),
            tokenizer,
            line_number: 0,
            offset: 0,
        };
        for _ in 0..lines_to_skip {
            if source.next_line().await?.is_none() {
                break;
            }
        }
        Ok(source)
    }

    /// The input path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn next_line(&mut self) -> Result<Option<Line>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        let mut bytes = self.buf.as_slice();
        if let Some(rest) = bytes.strip_suffix(b"\n") {
            bytes = rest;
        }
        if let Some(rest) = bytes.strip_suffix(b"\r") {
            bytes = rest;
        }
        let line = match std::str::from_utf8(bytes) {
            Ok(text) => Line::Text(text.to_string()),
            Err(_) => Line::Invalid(String::from_utf8_lossy(bytes).into_owned()),
        };
        Ok(Some(line))
    }

    async fn next_data_line(&mut self) -> Result<Option<Line>> {
        while let Some(line) = self.next_line().await? {
            if !line.is_blank() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RecordSource for DelimitedFileSource {
    async fn next(&mut self) -> Result<Option<RawRecord>> {
        let Some(line) = self.next_data_line().await? else {
            return Ok(None);
        };
        let offset = self.offset;
        self.offset += 1;
        match line {
            Line::Text(text) => Ok(Some(self.tokenizer.tokenize(&text, self.line_number, offset)?)),
            Line::Invalid(lossy) => Err(ParseError::new("record is not valid UTF-8")
                .with_input(lossy)
                .with_line_number(self.line_number)
                .into()),
        }
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        while self.offset < offset {
            if self.next_data_line().await?.is_none() {
                return Err(BatchError::resource(
                    self.path.display().to_string(),
                    format!(
                        "cannot resume at offset {offset}: input has only {} records",
                        self.offset
                    ),
                ));
            }
            self.offset += 1;
        }
        debug!(path = %self.path.display(), offset, "Positioned reader");
        Ok(())
    }

    fn current_offset(&self) -> u64 {
        self.offset
    }
}
