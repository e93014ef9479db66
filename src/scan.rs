//! Cursor-based full scan of one collection.
//!
//! [`Scanner`] pulls one page at a time from a server-held scroll cursor,
//! renewing the cursor's keep-alive on every fetch. The sequence is lazy
//! and finite: [`Scanner::next_page`] returns `Ok(None)` once the store
//! hands back an empty page, after which the cursor is released.
//!
//! There is no snapshot guarantee from this layer and no retry. A failed
//! fetch ends the scan; the caller decides what the partial result means.

use tracing::{debug, warn};

use crate::models::Document;
use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub page_size: usize,
    /// Cursor lifetime, in the store's time-unit syntax (`"5m"`).
    pub keep_alive: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            page_size: 1000,
            keep_alive: "5m".to_string(),
        }
    }
}

enum CursorState {
    NotStarted,
    Open(String),
    Exhausted,
}

pub struct Scanner<'a> {
    store: &'a dyn DocumentStore,
    collection: String,
    options: ScanOptions,
    state: CursorState,
    scanned: u64,
}

impl<'a> Scanner<'a> {
    pub fn new(store: &'a dyn DocumentStore, collection: &str, options: ScanOptions) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            options,
            state: CursorState::NotStarted,
            scanned: 0,
        }
    }

    /// Documents yielded so far.
    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    /// Fetch the next non-empty page, or `None` when the scan is complete.
    ///
    /// After an error the scanner is exhausted; further calls return `None`.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Document>>, StoreError> {
        let fetched = match &self.state {
            CursorState::Exhausted => return Ok(None),
            CursorState::NotStarted => {
                self.store
                    .open_scroll(&self.collection, self.options.page_size, &self.options.keep_alive)
                    .await
            }
            CursorState::Open(cursor) => {
                self.store
                    .next_scroll_page(cursor, &self.options.keep_alive)
                    .await
            }
        };

        let page = match fetched {
            Ok(page) => page,
            Err(e) => {
                // the store releases whatever it still tracks on close
                self.state = CursorState::Exhausted;
                return Err(e);
            }
        };

        if page.documents.is_empty() {
            if let Some(cursor) = page.cursor.as_deref() {
                self.release(cursor).await;
            }
            self.state = CursorState::Exhausted;
            debug!(collection = %self.collection, scanned = self.scanned, "scan complete");
            return Ok(None);
        }

        self.state = match page.cursor {
            Some(cursor) => CursorState::Open(cursor),
            // a store that cannot continue has returned everything
            None => CursorState::Exhausted,
        };
        self.scanned += page.documents.len() as u64;
        Ok(Some(page.documents))
    }

    /// Drain the whole scan into memory. Intended for small collections.
    pub async fn collect_all(mut self) -> Result<Vec<Document>, StoreError> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }

    async fn release(&self, cursor: &str) {
        if let Err(e) = self.store.clear_scroll(cursor).await {
            warn!(collection = %self.collection, error = %e, "failed to release scroll cursor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn options(page_size: usize) -> ScanOptions {
        ScanOptions {
            page_size,
            keep_alive: "1m".to_string(),
        }
    }

    #[tokio::test]
    async fn covers_every_document_across_pages() {
        let store = InMemoryStore::new();
        for i in 0..7 {
            store.insert("assets", json!({ "hostname": format!("h{}", i) }));
        }

        let mut scanner = Scanner::new(&store, "assets", options(3));
        let mut sizes = Vec::new();
        while let Some(page) = scanner.next_page().await.unwrap() {
            sizes.push(page.len());
        }
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(scanner.scanned(), 7);
        assert_eq!(store.open_scrolls(), 0, "cursor released after exhaustion");
        assert!(scanner.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_collection_yields_nothing() {
        let store = InMemoryStore::new();
        store.create_collection("empty", None).await.unwrap();
        let docs = Scanner::new(&store, "empty", options(10))
            .collect_all()
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn expired_cursor_aborts_without_resume() {
        let store = InMemoryStore::new();
        for i in 0..10 {
            store.insert("assets", json!({ "n": i }));
        }
        store.expire_scrolls_after(2);

        let mut scanner = Scanner::new(&store, "assets", options(2));
        assert_eq!(scanner.next_page().await.unwrap().unwrap().len(), 2);
        assert_eq!(scanner.next_page().await.unwrap().unwrap().len(), 2);
        let err = scanner.next_page().await.unwrap_err();
        assert!(matches!(err, StoreError::CursorExpired(_)));
        assert_eq!(scanner.scanned(), 4);
        assert!(scanner.next_page().await.unwrap().is_none());
    }
}
