//! Document store abstraction.
//!
//! The [`DocumentStore`] trait lists every capability the pipeline needs
//! from the remote store, so the stages can run against the Elasticsearch
//! HTTP client in production and the in-memory store in tests.
//!
//! Every method is awaited to completion before the caller issues the next
//! one; nothing here is pipelined.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`ping`](DocumentStore::ping) | Health check |
//! | [`list_collections`](DocumentStore::list_collections) | Names and document counts |
//! | [`create_collection`](DocumentStore::create_collection) | Idempotent create with optional schema hints |
//! | [`open_scroll`](DocumentStore::open_scroll) / [`next_scroll_page`](DocumentStore::next_scroll_page) / [`clear_scroll`](DocumentStore::clear_scroll) | Cursor-based full scan |
//! | [`bulk_index`](DocumentStore::bulk_index) | Batched writes with per-item outcomes |
//! | [`update_by_query`](DocumentStore::update_by_query) | Server-evaluated in-place patch |
//! | [`delete_by_query`](DocumentStore::delete_by_query) | Server-evaluated delete |

pub mod elastic;
pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::models::{CollectionInfo, Document};
use crate::query::Query;
use crate::script::PatchScript;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store at {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("scroll cursor expired or was released: {0}")]
    CursorExpired(String),

    #[error("{operation} failed with HTTP {status}: {reason}")]
    Http {
        operation: &'static str,
        status: u16,
        reason: String,
    },

    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned an unexpected response: {detail}")]
    Malformed {
        operation: &'static str,
        detail: String,
    },
}

/// One page of a scroll.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    /// Cursor to continue with; stores may rotate it between pages.
    pub cursor: Option<String>,
    pub documents: Vec<Document>,
}

/// One write inside a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub collection: String,
    /// `None` lets the store assign a fresh id.
    pub id: Option<String>,
    pub source: Map<String, Value>,
}

impl BulkItem {
    pub fn index(collection: &str, document: Document) -> Self {
        Self {
            collection: collection.to_string(),
            id: document.id,
            source: document.source,
        }
    }

    pub fn into_document(self) -> Document {
        Document {
            id: self.id,
            source: self.source,
        }
    }
}

/// Outcome of one bulk item: the stored id, or the store's reason.
pub type ItemOutcome = std::result::Result<String, String>;

/// How a by-query operation reacts to version conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflicts {
    Abort,
    Proceed,
}

impl Conflicts {
    pub fn from_proceed(proceed: bool) -> Self {
        if proceed {
            Conflicts::Proceed
        } else {
            Conflicts::Abort
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Conflicts::Abort => "abort",
            Conflicts::Proceed => "proceed",
        }
    }
}

/// A per-document failure reported by a server-evaluated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFailure {
    pub id: Option<String>,
    pub reason: String,
}

/// Completion report of an update- or delete-by-query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByQueryResponse {
    /// Documents matched by the query.
    pub total: u64,
    /// Documents updated or deleted.
    pub affected: u64,
    pub version_conflicts: u64,
    pub failures: Vec<ServerFailure>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short label for logs (endpoint or backend name).
    fn describe(&self) -> String;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError>;

    /// Create `name` unless it exists. Returns `true` when it was created.
    async fn create_collection(
        &self,
        name: &str,
        schema: Option<&Value>,
    ) -> Result<bool, StoreError>;

    /// Start a scroll over every document in `collection`.
    async fn open_scroll(
        &self,
        collection: &str,
        page_size: usize,
        keep_alive: &str,
    ) -> Result<ScrollPage, StoreError>;

    /// Fetch the next page, renewing the cursor for another `keep_alive`.
    async fn next_scroll_page(
        &self,
        cursor: &str,
        keep_alive: &str,
    ) -> Result<ScrollPage, StoreError>;

    async fn clear_scroll(&self, cursor: &str) -> Result<(), StoreError>;

    /// Submit one bulk request. The outcome vector is parallel to `items`.
    async fn bulk_index(&self, items: &[BulkItem]) -> Result<Vec<ItemOutcome>, StoreError>;

    /// Patch every document matching `query`; blocks until done.
    async fn update_by_query(
        &self,
        collection: &str,
        query: &Query,
        script: &PatchScript,
        conflicts: Conflicts,
    ) -> Result<ByQueryResponse, StoreError>;

    /// Delete every document matching `query`; blocks until done.
    async fn delete_by_query(
        &self,
        collection: &str,
        query: &Query,
        conflicts: Conflicts,
    ) -> Result<ByQueryResponse, StoreError>;

    /// Release client-side resources. Later calls are not supported.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
