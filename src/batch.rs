//! Result batcher (C10): accumulates per-worker rows and flushes fixed-size batches to a
//! [`ResultSink`], deduplicating so only the last write for a given URL within a pending batch
//! survives.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{CrawlError, CrawlResult};
use crate::sink::{ResultRecord, ResultSink};

/// Buffers rows from any number of worker threads behind a single mutex and flushes to the sink
/// once `batch_size` rows are pending (or on explicit [`Batcher::flush`]).
pub struct Batcher<'a> {
    sink: &'a dyn ResultSink,
    batch_size: usize,
    pending: Mutex<Vec<ResultRecord>>,
}

impl<'a> Batcher<'a> {
    pub fn new(sink: &'a dyn ResultSink, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Append one row, flushing a full batch if this push filled it.
    pub fn push(&self, row: ResultRecord) -> CrawlResult<()> {
        let mut to_flush = None;
        {
            let mut pending = self.pending.lock().expect("batch lock poisoned");
            pending.push(row);
            if pending.len() >= self.batch_size {
                to_flush = Some(std::mem::take(&mut *pending));
            }
        }
        if let Some(rows) = to_flush {
            self.write(rows)?;
        }
        Ok(())
    }

    /// Flush whatever is pending, regardless of batch size. Call on worker-pool shutdown so the
    /// final partial batch isn't lost.
    pub fn flush(&self) -> CrawlResult<()> {
        let rows = {
            let mut pending = self.pending.lock().expect("batch lock poisoned");
            std::mem::take(&mut *pending)
        };
        if rows.is_empty() {
            return Ok(());
        }
        self.write(rows)
    }

    fn write(&self, rows: Vec<ResultRecord>) -> CrawlResult<()> {
        let deduped = dedup_last_write_wins(rows);
        self.sink
            .write_batch(&deduped)
            .map_err(CrawlError::SinkRejected)
    }
}

/// Last-write-wins deduplication by URL, preserving the order of first occurrence.
fn dedup_last_write_wins(rows: Vec<ResultRecord>) -> Vec<ResultRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut by_url: HashMap<String, ResultRecord> = HashMap::new();
    for row in rows {
        if !by_url.contains_key(&row.url) {
            order.push(row.url.clone());
        }
        by_url.insert(row.url.clone(), row);
    }
    order
        .into_iter()
        .filter_map(|url| by_url.remove(&url))
        .collect()
}
