//! In-memory [`DocumentStore`] for tests.
//!
//! Collections are `Vec`s behind `std::sync::RwLock`. Queries and patch
//! scripts are evaluated with [`Query::matches`] and [`PatchScript::apply`],
//! so this backend agrees with the HTTP store on the semantics this crate
//! relies on. Scrolls snapshot the collection when opened.
//!
//! Faults can be injected to exercise the pipeline's failure bookkeeping:
//! an unreachable store, expiring cursors, rejected documents and failing
//! operations.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{CollectionInfo, Document};
use crate::query::Query;
use crate::script::PatchScript;

use super::{
    BulkItem, ByQueryResponse, Conflicts, DocumentStore, ItemOutcome, ScrollPage, StoreError,
};

/// Operations that can be told to fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListCollections,
    CreateCollection,
    OpenScroll,
    Bulk,
    UpdateByQuery,
    DeleteByQuery,
}

#[derive(Default)]
struct StoredCollection {
    schema: Option<Value>,
    docs: Vec<Document>,
}

struct OpenScroll {
    pending: VecDeque<Document>,
    page_size: usize,
    pages_served: usize,
}

#[derive(Default)]
struct Faults {
    unreachable: bool,
    expire_after_pages: Option<usize>,
    reject_where: Option<(String, Value)>,
    failing: HashSet<Operation>,
}

/// In-memory store for testing.
pub struct InMemoryStore {
    collections: RwLock<BTreeMap<String, StoredCollection>>,
    scrolls: Mutex<HashMap<String, OpenScroll>>,
    faults: Mutex<Faults>,
    bulk_sizes: Mutex<Vec<usize>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            scrolls: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            bulk_sizes: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Insert a JSON object into `collection`, creating it if needed.
    /// Returns the assigned id.
    pub fn insert(&self, collection: &str, source: Value) -> String {
        let id = self.fresh_id();
        let mut doc = Document::from_value(source);
        doc.id = Some(id.clone());
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(collection.to_string())
            .or_default()
            .docs
            .push(doc);
        id
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections
            .get(collection)
            .map(|c| c.docs.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, collection: &str) -> usize {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).map_or(0, |c| c.docs.len())
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections.contains_key(collection)
    }

    pub fn schema(&self, collection: &str) -> Option<Value> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).and_then(|c| c.schema.clone())
    }

    /// Item counts of every bulk request received, in order.
    pub fn bulk_request_sizes(&self) -> Vec<usize> {
        self.bulk_sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Scroll cursors neither exhausted-and-cleared nor released by `close`.
    pub fn open_scrolls(&self) -> usize {
        self.scrolls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults().unreachable = unreachable;
    }

    /// Make every cursor expire once it has served `pages` pages.
    pub fn expire_scrolls_after(&self, pages: usize) {
        self.faults().expire_after_pages = Some(pages);
    }

    /// Reject bulk items whose `field` equals `value`.
    pub fn reject_documents_where(&self, field: &str, value: impl Into<Value>) {
        self.faults().reject_where = Some((field.to_string(), value.into()));
    }

    pub fn fail_operation(&self, operation: Operation) {
        self.faults().failing.insert(operation);
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fresh_id(&self) -> String {
        format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check(&self, operation: Operation, name: &'static str) -> Result<(), StoreError> {
        let faults = self.faults();
        if faults.unreachable {
            return Err(StoreError::Unreachable {
                endpoint: "memory".to_string(),
                reason: "injected outage".to_string(),
            });
        }
        if faults.failing.contains(&operation) {
            return Err(StoreError::Http {
                operation: name,
                status: 500,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn missing(operation: &'static str, collection: &str) -> StoreError {
        StoreError::Http {
            operation,
            status: 404,
            reason: format!("index_not_found_exception: no such index [{}]", collection),
        }
    }

    fn take_page(scroll: &mut OpenScroll) -> Vec<Document> {
        let n = scroll.page_size.min(scroll.pending.len());
        scroll.pages_served += 1;
        scroll.pending.drain(..n).collect()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let faults = self.faults();
        if faults.unreachable {
            return Err(StoreError::Unreachable {
                endpoint: "memory".to_string(),
                reason: "injected outage".to_string(),
            });
        }
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError> {
        self.check(Operation::ListCollections, "list collections")?;
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections
            .iter()
            .map(|(name, c)| CollectionInfo {
                name: name.clone(),
                doc_count: Some(c.docs.len() as u64),
            })
            .collect())
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: Option<&Value>,
    ) -> Result<bool, StoreError> {
        self.check(Operation::CreateCollection, "create collection")?;
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        if collections.contains_key(name) {
            return Ok(false);
        }
        collections.insert(
            name.to_string(),
            StoredCollection {
                schema: schema.cloned(),
                docs: Vec::new(),
            },
        );
        Ok(true)
    }

    async fn open_scroll(
        &self,
        collection: &str,
        page_size: usize,
        _keep_alive: &str,
    ) -> Result<ScrollPage, StoreError> {
        self.check(Operation::OpenScroll, "open scroll")?;
        let snapshot: VecDeque<Document> = {
            let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
            collections
                .get(collection)
                .ok_or_else(|| Self::missing("open scroll", collection))?
                .docs
                .iter()
                .cloned()
                .collect()
        };

        let mut scroll = OpenScroll {
            pending: snapshot,
            page_size: page_size.max(1),
            pages_served: 0,
        };
        let documents = Self::take_page(&mut scroll);
        let cursor = format!("scroll-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.scrolls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cursor.clone(), scroll);

        Ok(ScrollPage {
            cursor: Some(cursor),
            documents,
        })
    }

    async fn next_scroll_page(
        &self,
        cursor: &str,
        _keep_alive: &str,
    ) -> Result<ScrollPage, StoreError> {
        self.check(Operation::OpenScroll, "scroll")?;
        let expire_after = self.faults().expire_after_pages;
        let mut scrolls = self.scrolls.lock().unwrap_or_else(PoisonError::into_inner);
        let scroll = scrolls
            .get_mut(cursor)
            .ok_or_else(|| StoreError::CursorExpired(format!("no search context for {}", cursor)))?;

        if let Some(limit) = expire_after {
            if scroll.pages_served >= limit {
                scrolls.remove(cursor);
                return Err(StoreError::CursorExpired(format!(
                    "search context {} timed out",
                    cursor
                )));
            }
        }

        let documents = Self::take_page(scroll);
        Ok(ScrollPage {
            cursor: Some(cursor.to_string()),
            documents,
        })
    }

    async fn clear_scroll(&self, cursor: &str) -> Result<(), StoreError> {
        self.scrolls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(cursor);
        Ok(())
    }

    async fn bulk_index(&self, items: &[BulkItem]) -> Result<Vec<ItemOutcome>, StoreError> {
        self.check(Operation::Bulk, "bulk")?;
        self.bulk_sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(items.len());

        let reject_where = self.faults().reject_where.clone();
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let mut outcomes = Vec::with_capacity(items.len());

        for item in items {
            if let Some((field, value)) = &reject_where {
                if item.source.get(field) == Some(value) {
                    outcomes.push(Err(format!(
                        "mapper_parsing_exception: failed to parse field [{}]",
                        field
                    )));
                    continue;
                }
            }

            let id = item.id.clone().unwrap_or_else(|| self.fresh_id());
            let doc = Document::with_id(id.clone(), item.source.clone());
            let target = collections.entry(item.collection.clone()).or_default();
            match target.docs.iter_mut().find(|d| d.id.as_deref() == Some(&id)) {
                Some(existing) => *existing = doc,
                None => target.docs.push(doc),
            }
            outcomes.push(Ok(id));
        }

        Ok(outcomes)
    }

    async fn update_by_query(
        &self,
        collection: &str,
        query: &Query,
        script: &PatchScript,
        _conflicts: Conflicts,
    ) -> Result<ByQueryResponse, StoreError> {
        self.check(Operation::UpdateByQuery, "update by query")?;
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing("update by query", collection))?;

        let mut response = ByQueryResponse::default();
        for doc in target.docs.iter_mut().filter(|d| query.matches(&d.source)) {
            script.apply(doc);
            response.total += 1;
            response.affected += 1;
        }
        Ok(response)
    }

    async fn delete_by_query(
        &self,
        collection: &str,
        query: &Query,
        _conflicts: Conflicts,
    ) -> Result<ByQueryResponse, StoreError> {
        self.check(Operation::DeleteByQuery, "delete by query")?;
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing("delete by query", collection))?;

        let before = target.docs.len();
        target.docs.retain(|d| !query.matches(&d.source));
        let deleted = (before - target.docs.len()) as u64;
        Ok(ByQueryResponse {
            total: deleted,
            affected: deleted,
            ..ByQueryResponse::default()
        })
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.scrolls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scroll_pages_through_snapshot() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.insert("assets", json!({ "n": i }));
        }

        let first = store.open_scroll("assets", 2, "1m").await.unwrap();
        assert_eq!(first.documents.len(), 2);
        let cursor = first.cursor.unwrap();
        assert_eq!(store.next_scroll_page(&cursor, "1m").await.unwrap().documents.len(), 2);
        assert_eq!(store.next_scroll_page(&cursor, "1m").await.unwrap().documents.len(), 1);
        assert!(store.next_scroll_page(&cursor, "1m").await.unwrap().documents.is_empty());

        store.clear_scroll(&cursor).await.unwrap();
        assert_eq!(store.open_scrolls(), 0);
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = InMemoryStore::new();
        assert!(store.create_collection("t", None).await.unwrap());
        assert!(!store.create_collection("t", None).await.unwrap());
    }

    #[tokio::test]
    async fn bulk_rejects_only_matching_items() {
        let store = InMemoryStore::new();
        store.reject_documents_where("bad", true);
        let items = vec![
            BulkItem::index("t", Document::from_value(json!({"bad": true}))),
            BulkItem::index("t", Document::from_value(json!({"bad": false}))),
        ];
        let outcomes = store.bulk_index(&items).await.unwrap();
        assert!(outcomes[0].is_err());
        assert!(outcomes[1].is_ok());
        assert_eq!(store.count("t"), 1);
    }

    #[tokio::test]
    async fn scroll_on_missing_collection_is_404() {
        let store = InMemoryStore::new();
        let err = store.open_scroll("nope", 10, "1m").await.unwrap_err();
        assert!(matches!(err, StoreError::Http { status: 404, .. }));
    }
}
