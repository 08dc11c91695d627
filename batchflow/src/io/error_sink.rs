//! Delimited error file for skipped records.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::ErrorSink;
use crate::errors::Result;
use crate::skip::SkipRecord;

/// Appends skip records to a delimited text file.
///
/// The header (field names, then `type` and `error`) is written only when the
/// file is new or empty, so a restarted step keeps appending to the same file.
#[derive(Debug)]
pub struct CsvErrorSink {
    path: PathBuf,
    header: String,
    delimiter: char,
    write_lock: Mutex<()>,
}

impl CsvErrorSink {
    /// Creates a sink writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, field_names: &[String], delimiter: char) -> Self {
        let mut columns: Vec<&str> = field_names.iter().map(String::as_str).collect();
        columns.push("type");
        columns.push("error");
        Self {
            path: path.into(),
            header: columns.join(&delimiter.to_string()),
            delimiter,
            write_lock: Mutex::new(()),
        }
    }

    /// The error file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The header line.
    #[must_use]
    pub fn header(&self) -> &str {
        &self.header
    }

    fn format_line(&self, record: &SkipRecord) -> String {
        let sep = self.delimiter.to_string();
        let mut columns: Vec<String> = record.fields.clone();
        columns.push(record.phase.to_string());
        columns.push(record.message.replace(['\r', '\n'], " "));
        columns.join(&sep)
    }
}

#[async_trait]
impl ErrorSink for CsvErrorSink {
    async fn append(&self, record: &SkipRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut buf = String::new();
        if file.metadata().await?.len() == 0 {
            buf.push_str(&self.header);
            buf.push('\n');
        }
        buf.push_str(&self.format_line(record));
        buf.push('\n');
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
