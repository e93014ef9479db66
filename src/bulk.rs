//! Chunked bulk writes with per-item bookkeeping.
//!
//! [`BulkWriter`] buffers [`BulkItem`]s and submits a request whenever the
//! buffer reaches `chunk_size`. Exactly one request is in flight at a time.
//! Item outcomes are independent: a rejected document is recorded in the
//! report and its siblings are still counted as written. A request that
//! fails as a whole marks every item of that chunk as failed and writing
//! continues with the next chunk. Nothing is retried.

use tracing::{debug, warn};

use crate::models::Document;
use crate::store::{BulkItem, DocumentStore};

pub const DEFAULT_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    pub document: Document,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReport {
    pub succeeded: u64,
    pub failures: Vec<WriteFailure>,
    pub chunks: u64,
}

impl BulkReport {
    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }
}

/// Outcome of one submitted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct BulkWriter<'a> {
    store: &'a dyn DocumentStore,
    chunk_size: usize,
    buffer: Vec<BulkItem>,
    report: BulkReport,
}

impl<'a> BulkWriter<'a> {
    pub fn new(store: &'a dyn DocumentStore, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            store,
            chunk_size,
            buffer: Vec::with_capacity(chunk_size),
            report: BulkReport::default(),
        }
    }

    pub fn report(&self) -> &BulkReport {
        &self.report
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Stage one item; submits a chunk when the buffer is full.
    pub async fn stage(&mut self, item: BulkItem) -> Option<ChunkOutcome> {
        self.buffer.push(item);
        if self.buffer.len() >= self.chunk_size {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Submit whatever is buffered. An empty buffer submits nothing.
    pub async fn flush(&mut self) -> ChunkOutcome {
        if self.buffer.is_empty() {
            return ChunkOutcome {
                submitted: 0,
                succeeded: 0,
                failed: 0,
            };
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_size));
        let submitted = chunk.len();
        self.report.chunks += 1;

        let mut succeeded = 0;
        let mut failed = 0;
        match self.store.bulk_index(&chunk).await {
            Ok(outcomes) => {
                for (item, outcome) in chunk.into_iter().zip(outcomes) {
                    match outcome {
                        Ok(_) => succeeded += 1,
                        Err(reason) => {
                            failed += 1;
                            self.report.failures.push(WriteFailure {
                                document: item.into_document(),
                                reason,
                            });
                        }
                    }
                }
            }
            Err(e) => {
                warn!(items = submitted, error = %e, "bulk request failed; chunk counted as failed");
                let reason = e.to_string();
                for item in chunk {
                    failed += 1;
                    self.report.failures.push(WriteFailure {
                        document: item.into_document(),
                        reason: reason.clone(),
                    });
                }
            }
        }

        self.report.succeeded += succeeded as u64;
        debug!(submitted, succeeded, failed, "bulk chunk done");
        ChunkOutcome {
            submitted,
            succeeded,
            failed,
        }
    }

    /// Flush the remainder and return the aggregate report.
    pub async fn finish(mut self) -> BulkReport {
        self.flush().await;
        self.report
    }
}

/// Write an ordered sequence of items in chunks of `chunk_size`.
pub async fn write_all(
    store: &dyn DocumentStore,
    items: impl IntoIterator<Item = BulkItem>,
    chunk_size: usize,
) -> BulkReport {
    let mut writer = BulkWriter::new(store, chunk_size);
    for item in items {
        writer.stage(item).await;
    }
    writer.finish().await
}
