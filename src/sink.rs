use std::sync::Mutex;

use tracing::info;

use crate::error::SinkError;
use crate::model::Entry;

/// Acknowledgement returned by a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkAck {
    pub accepted: usize,
}

/// Downstream index/store receiving flushed batches.
///
/// Implementations must apply idempotently: dedup re-upserts and WAL
/// recovery can both deliver the same logical write more than once.
pub trait DownstreamSink: Send + Sync {
    fn commit(&self, batch: &[Entry]) -> Result<SinkAck, SinkError>;
}

/// Logs every batch and accepts it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DownstreamSink for LogSink {
    fn commit(&self, batch: &[Entry]) -> Result<SinkAck, SinkError> {
        let first = batch.first().map(|e| e.id.as_str()).unwrap_or("");
        let last = batch.last().map(|e| e.id.as_str()).unwrap_or("");
        info!(size = batch.len(), first, last, "committed batch downstream");
        Ok(SinkAck { accepted: batch.len() })
    }
}

/// Keeps every committed batch in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Entry>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<Entry>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Ids across all batches, in delivery order.
    pub fn delivered_ids(&self) -> Vec<String> {
        self.batches()
            .iter()
            .flatten()
            .map(|e| e.id.clone())
            .collect()
    }
}

impl DownstreamSink for MemorySink {
    fn commit(&self, batch: &[Entry]) -> Result<SinkAck, SinkError> {
        let mut batches = self
            .batches
            .lock()
            .map_err(|_| SinkError::Unavailable("poisoned lock".into()))?;
        batches.push(batch.to_vec());
        Ok(SinkAck { accepted: batch.len() })
    }
}
