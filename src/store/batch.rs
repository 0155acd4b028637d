use tracing::debug;

use super::contract::{DocumentStore, StoreResult, WriteOp};

/// Auto-flush threshold, kept under the store's hard batch limit so a
/// caller can never assemble an unwritable batch.
pub const BATCH_FLUSH_THRESHOLD: usize = 450;

/// Accumulates write operations and flushes them in bounded batches.
/// Callers push writes and never manage the batch ceiling themselves.
pub struct BatchWriter<'a> {
    store: &'a dyn DocumentStore,
    pending: Vec<WriteOp>,
    threshold: usize,
    written: u64,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        let threshold = BATCH_FLUSH_THRESHOLD.min(store.max_batch_size());
        Self {
            store,
            pending: Vec::new(),
            threshold,
            written: 0,
        }
    }

    pub async fn push(&mut self, op: WriteOp) -> StoreResult<()> {
        self.pending.push(op);
        if self.pending.len() >= self.threshold {
            self.flush().await?;
        }
        Ok(())
    }

    /// Drain everything accumulated so far. Safe to call when empty.
    pub async fn flush(&mut self) -> StoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let count = batch.len();
        self.store.apply(batch).await?;
        self.written += count as u64;
        debug!(count, total = self.written, "flushed write batch");
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Total operations committed to the store by this writer.
    pub fn ops_written(&self) -> u64 {
        self.written
    }
}
