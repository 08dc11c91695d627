//! In-memory sources and sinks for embedding and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{ErrorSink, LineTokenizer, RawRecord, RecordSink, RecordSource};
use crate::errors::Result;
use crate::skip::SkipRecord;

/// A record source over lines held in memory.
#[derive(Debug, Clone)]
pub struct VecSource {
    lines: Vec<String>,
    tokenizer: LineTokenizer,
    position: usize,
}

impl VecSource {
    /// Creates a source over `lines` (no header).
    #[must_use]
    pub fn new(lines: Vec<String>, tokenizer: LineTokenizer) -> Self {
        Self {
            lines,
            tokenizer,
            position: 0,
        }
    }
}

#[async_trait]
impl RecordSource for VecSource {
    async fn next(&mut self) -> Result<Option<RawRecord>> {
        let Some(line) = self.lines.get(self.position) else {
            return Ok(None);
        };
        let offset = self.position as u64;
        self.position += 1;
        Ok(Some(self.tokenizer.tokenize(line, self.position, offset)?))
    }

    async fn seek(&mut self, offset: u64) -> Result<()> {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        self.position = offset.min(self.lines.len());
        Ok(())
    }

    fn current_offset(&self) -> u64 {
        self.position as u64
    }
}

/// A sink that keeps every written chunk.
#[derive(Debug)]
pub struct CollectingSink<I> {
    chunks: Arc<Mutex<Vec<Vec<I>>>>,
}

impl<I> Clone for CollectingSink<I> {
    fn clone(&self) -> Self {
        Self {
            chunks: self.chunks.clone(),
        }
    }
}

impl<I> Default for CollectingSink<I> {
    fn default() -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<I: Clone> CollectingSink<I> {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All written items, in write order.
    #[must_use]
    pub fn items(&self) -> Vec<I> {
        self.chunks.lock().iter().flatten().cloned().collect()
    }

    /// The committed chunks.
    #[must_use]
    pub fn chunks(&self) -> Vec<Vec<I>> {
        self.chunks.lock().clone()
    }
}

#[async_trait]
impl<I: Clone + Send + Sync> RecordSink<I> for CollectingSink<I> {
    async fn write_all(&self, items: &[I]) -> Result<()> {
        self.chunks.lock().push(items.to_vec());
        Ok(())
    }
}

/// An error sink that keeps every skip record.
#[derive(Debug, Clone, Default)]
pub struct CollectingErrorSink {
    records: Arc<Mutex<Vec<SkipRecord>>>,
}

impl CollectingErrorSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All appended records.
    #[must_use]
    pub fn records(&self) -> Vec<SkipRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ErrorSink for CollectingErrorSink {
    async fn append(&self, record: &SkipRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_vec_source_seek_and_read() {
        let lines = vec!["a;1".to_string(), "b".to_string(), "c;3".to_string()];
        let mut source = VecSource::new(lines, LineTokenizer::new(';', 2));
        assert_eq!(source.next().await.unwrap().unwrap().field(0), Some("a"));
        assert!(source.next().await.is_err());
        assert_eq!(source.current_offset(), 2);
        source.seek(0).await.unwrap();
        assert_eq!(source.current_offset(), 0);
        source.seek(10).await.unwrap();
        assert!(source.next().await.unwrap().is_none());
    }

    #[test]
    fn test_collecting_sink_shares_state() {
        let sink = CollectingSink::<u32>::new();
        let handle = sink.clone();
        tokio_test::block_on(async {
            sink.write_all(&[1, 2]).await.unwrap();
            sink.write_all(&[3]).await.unwrap();
        });
        assert_eq!(handle.items(), vec![1, 2, 3]);
        assert_eq!(handle.chunks().len(), 2);
    }
}
