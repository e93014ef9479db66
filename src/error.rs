//! Pipeline-level failure classes.
//!
//! Each variant decides how far a failure travels: a connectivity failure
//! stops the workflow before any stage, the others end only the stage that
//! raised them. Per-document write rejections are not errors at all; they
//! are counted in the stage reports.

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot reach the document store: {0}")]
    Connectivity(#[source] StoreError),

    #[error("scan of '{collection}' aborted after {scanned} documents: {source}")]
    Scan {
        collection: String,
        scanned: u64,
        #[source]
        source: StoreError,
    },

    #[error("{stage} on '{collection}' failed: {source}")]
    ServerOperation {
        stage: &'static str,
        collection: String,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Connectivity(_))
    }
}
