//! Batched, retrying row writer.
//!
//! Rows accumulate in a pending batch bounded by a byte limit and a row
//! limit. A row that would push the batch to either limit flushes the batch
//! first; a row that is at or over the byte limit on its own is written as a
//! batch of one. Flushes retry transient store failures with exponential
//! backoff plus jitter.
//!
//! Pending state and flushing are guarded by separate locks, so one thread
//! can append while another is waiting on the store, and flushes never
//! interleave.

use crate::context::CancelToken;
use crate::error::{ImportError, Result};
use crate::store::{Mutation, TargetStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest single backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Limits and retry policy for batched writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Flush before a batch reaches this many bytes
    pub bytes_limit: usize,
    /// Most rows in one batch
    pub write_limit: usize,
    /// Retries after the first failed attempt
    pub retry_limit: u32,
    /// Base backoff, doubled on every retry
    pub retry_backoff_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            bytes_limit: 100_000_000,
            write_limit: 2000,
            retry_limit: 1000,
            retry_backoff_ms: 100,
        }
    }
}

impl BatchConfig {
    /// Sleep before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = Duration::from_millis(self.retry_backoff_ms);
        let exp = base.saturating_mul(1u32 << retry.saturating_sub(1).min(16));
        let jitter = base.mul_f64(rand::random::<f64>());
        exp.saturating_add(jitter).min(MAX_BACKOFF)
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub batches: u64,
    pub rows_written: u64,
    pub retries: u64,
    pub abandoned_rows: u64,
}

#[derive(Debug, Default)]
struct Batch {
    rows: Vec<Mutation>,
    bytes: usize,
}

impl Batch {
    /// True if `size` more bytes must go into a fresh batch
    fn must_flush_before(&self, size: usize, config: &BatchConfig) -> bool {
        !self.rows.is_empty()
            && (self.bytes + size >= config.bytes_limit || self.rows.len() + 1 > config.write_limit)
    }
}

pub struct BatchWriter {
    store: Arc<dyn TargetStore>,
    config: BatchConfig,
    pending: Mutex<Batch>,
    flush_lock: Mutex<()>,
    stats: Mutex<WriterStats>,
    cancel: CancelToken,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn TargetStore>, config: BatchConfig) -> Self {
        Self {
            store,
            config,
            pending: Mutex::new(Batch::default()),
            flush_lock: Mutex::new(()),
            stats: Mutex::new(WriterStats::default()),
            cancel: CancelToken::new(),
        }
    }

    /// Stop retrying once `cancel` is set
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Queue a row, flushing first if it does not fit the pending batch
    pub fn add_row(&self, mutation: Mutation) -> Result<()> {
        let size = mutation.byte_size();
        loop {
            let mut pending = self.pending.lock();
            if pending.must_flush_before(size, &self.config) {
                drop(pending);
                self.flush()?;
                continue;
            }
            pending.rows.push(mutation);
            pending.bytes += size;
            let oversized = pending.bytes >= self.config.bytes_limit;
            drop(pending);

            if oversized {
                debug!("row of {} bytes written as its own batch", size);
                self.flush()?;
            }
            return Ok(());
        }
    }

    /// Write the pending batch, retrying transient failures
    pub fn flush(&self) -> Result<()> {
        let _flushing = self.flush_lock.lock();
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.rows.is_empty() {
            return Ok(());
        }
        self.write_batch(batch)
    }

    fn write_batch(&self, batch: Batch) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.store.apply(&batch.rows) {
                Ok(()) => {
                    let mut stats = self.stats.lock();
                    stats.batches += 1;
                    stats.rows_written += batch.rows.len() as u64;
                    debug!("flushed {} row(s), {} byte(s)", batch.rows.len(), batch.bytes);
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempts <= self.config.retry_limit => {
                    if self.cancel.is_cancelled() {
                        self.stats.lock().abandoned_rows += batch.rows.len() as u64;
                        return Err(ImportError::Cancelled);
                    }
                    self.stats.lock().retries += 1;
                    let wait = self.config.backoff(attempts);
                    warn!(
                        "flush attempt {} failed ({}), retrying in {:?}",
                        attempts, e, wait
                    );
                    std::thread::sleep(wait);
                }
                Err(e) => {
                    return Err(ImportError::Flush {
                        rows: batch.rows.len(),
                        attempts,
                        source: e,
                    })
                }
            }
        }
    }

    /// Drop the pending batch without writing it
    pub fn abandon(&self) -> usize {
        let batch = std::mem::take(&mut *self.pending.lock());
        let n = batch.rows.len();
        if n > 0 {
            warn!("abandoned {} pending row(s)", n);
            self.stats.lock().abandoned_rows += n as u64;
        }
        n
    }

    pub fn pending_rows(&self) -> usize {
        self.pending.lock().rows.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.lock().bytes
    }

    pub fn stats(&self) -> WriterStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TargetValue;
    use crate::error::StoreError;
    use crate::store::MemoryStore;

    fn row(n: i64) -> Mutation {
        Mutation::new("t", vec!["v".into()], vec![TargetValue::Int64(n)])
    }

    fn fast(bytes_limit: usize, write_limit: usize, retry_limit: u32) -> BatchConfig {
        BatchConfig {
            bytes_limit,
            write_limit,
            retry_limit,
            retry_backoff_ms: 0,
        }
    }

    #[test]
    fn test_count_limit() {
        let store = Arc::new(MemoryStore::new());
        let writer = BatchWriter::new(store.clone(), fast(1_000_000, 2, 0));
        for i in 0..5 {
            writer.add_row(row(i)).unwrap();
            assert!(writer.pending_rows() <= 2);
        }
        writer.flush().unwrap();
        assert_eq!(store.batch_sizes(), vec![2, 2, 1]);
        let values: Vec<_> = store.rows().iter().map(|m| m.values[0].clone()).collect();
        assert_eq!(values, (0..5).map(TargetValue::Int64).collect::<Vec<_>>());
    }

    #[test]
    fn test_byte_limit_invariant() {
        // each row is 1 + 1 + 8 = 10 bytes
        let store = Arc::new(MemoryStore::new());
        let writer = BatchWriter::new(store.clone(), fast(25, 100, 0));
        for i in 0..7 {
            writer.add_row(row(i)).unwrap();
            assert!(writer.pending_bytes() < 25);
        }
        writer.flush().unwrap();
        assert_eq!(store.batch_sizes(), vec![2, 2, 2, 1]);
    }

    #[test]
    fn test_oversized_row_is_its_own_batch() {
        let store = Arc::new(MemoryStore::new());
        let writer = BatchWriter::new(store.clone(), fast(50, 100, 0));
        writer.add_row(row(1)).unwrap();
        let big = Mutation::new("t", vec!["v".into()], vec![TargetValue::String("x".repeat(80))]);
        writer.add_row(big).unwrap();
        assert_eq!(writer.pending_rows(), 0);
        assert_eq!(store.batch_sizes(), vec![1, 1]);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_n(3, StoreError::Transient("aborted".into()));
        let writer = BatchWriter::new(store.clone(), fast(1000, 10, 5));
        writer.add_row(row(1)).unwrap();
        writer.flush().unwrap();

        assert_eq!(store.attempts(), 4);
        assert_eq!(store.rows().len(), 1);
        assert_eq!(writer.stats().retries, 3);
        assert_eq!(writer.stats().batches, 1);
    }

    #[test]
    fn test_retry_exhaustion_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_n(10, StoreError::Transient("aborted".into()));
        let writer = BatchWriter::new(store.clone(), fast(1000, 10, 2));
        writer.add_row(row(1)).unwrap();
        match writer.flush() {
            Err(ImportError::Flush { rows, attempts, .. }) => {
                assert_eq!(rows, 1);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected flush error, got {:?}", other),
        }
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(StoreError::Permanent("no such table".into()));
        let writer = BatchWriter::new(store.clone(), fast(1000, 10, 5));
        writer.add_row(row(1)).unwrap();
        assert!(matches!(writer.flush(), Err(ImportError::Flush { attempts: 1, .. })));
        assert_eq!(store.attempts(), 1);
    }

    #[test]
    fn test_cancel_stops_retrying() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_n(10, StoreError::Transient("aborted".into()));
        let cancel = CancelToken::new();
        cancel.cancel();
        let writer = BatchWriter::new(store.clone(), fast(1000, 10, 5)).with_cancel(cancel);
        writer.add_row(row(1)).unwrap();
        assert!(matches!(writer.flush(), Err(ImportError::Cancelled)));
        assert_eq!(store.attempts(), 1);
    }

    #[test]
    fn test_abandon_drops_pending() {
        let store = Arc::new(MemoryStore::new());
        let writer = BatchWriter::new(store.clone(), fast(1000, 10, 0));
        writer.add_row(row(1)).unwrap();
        writer.add_row(row(2)).unwrap();
        assert_eq!(writer.abandon(), 2);
        writer.flush().unwrap();
        assert!(store.rows().is_empty());
        assert_eq!(writer.stats().abandoned_rows, 2);
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(MemoryStore::new());
        let writer = Arc::new(BatchWriter::new(store.clone(), fast(1_000_000, 7, 0)));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let writer = Arc::clone(&writer);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        writer.add_row(row(t * 100 + i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        writer.flush().unwrap();
        assert_eq!(store.rows().len(), 200);
        assert!(store.batch_sizes().iter().all(|n| *n <= 7));
    }
}
