//! Elasticsearch-compatible [`DocumentStore`] over HTTP.
//!
//! Talks to the REST API directly with `reqwest`: scroll for full scans,
//! NDJSON `_bulk` for writes, `_update_by_query` / `_delete_by_query` with
//! `wait_for_completion=true` for the server-evaluated stages.
//!
//! # Authentication
//!
//! Resolved once by [`StoreConfig::credentials`]:
//! - API key → `Authorization: ApiKey <key>`
//! - username + password → HTTP basic auth
//!
//! # Errors
//!
//! Non-2xx responses are reported as [`StoreError::Http`] carrying the
//! store's `error.type: error.reason`. A missing scroll context maps to
//! [`StoreError::CursorExpired`]; connection failures on ping map to
//! [`StoreError::Unreachable`].

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::{Credentials, StoreConfig};
use crate::models::{CollectionInfo, Document};
use crate::query::Query;
use crate::script::PatchScript;

use super::{
    BulkItem, ByQueryResponse, Conflicts, DocumentStore, ItemOutcome, ScrollPage, ServerFailure,
    StoreError,
};

pub struct ElasticStore {
    client: reqwest::Client,
    endpoint: String,
    credentials: Credentials,
    by_query_timeout: Duration,
    /// Cursors handed out and not yet cleared; released on `close`.
    live_scrolls: Mutex<HashSet<String>>,
}

impl ElasticStore {
    /// Build the HTTP client. No request is sent until the first call.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let credentials = config.credentials()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim().trim_end_matches('/').to_string(),
            credentials,
            by_query_timeout: Duration::from_secs(config.by_query_timeout_secs),
            live_scrolls: Mutex::new(HashSet::new()),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.endpoint, path));
        match &self.credentials {
            Credentials::ApiKey(key) => builder.header("Authorization", format!("ApiKey {}", key)),
            Credentials::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            Credentials::None => builder,
        }
    }

    /// Send and decode a JSON response, mapping non-2xx to [`StoreError::Http`].
    async fn send(&self, operation: &'static str, builder: RequestBuilder) -> Result<Value, StoreError> {
        let response = builder
            .send()
            .await
            .map_err(|source| StoreError::Transport { operation, source })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| StoreError::Transport { operation, source })?;

        if !status.is_success() {
            return Err(http_error(operation, status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| StoreError::Malformed {
            operation,
            detail: e.to_string(),
        })
    }

    fn track_scroll(&self, previous: Option<&str>, current: Option<&str>) {
        let mut live = self.live_scrolls.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = previous {
            live.remove(prev);
        }
        if let Some(cur) = current {
            live.insert(cur.to_string());
        }
    }

    /// `affected_key` names the counter the endpoint reports (`updated` or
    /// `deleted`).
    async fn by_query(
        &self,
        operation: &'static str,
        affected_key: &str,
        path: String,
        conflicts: Conflicts,
        body: Value,
    ) -> Result<ByQueryResponse, StoreError> {
        let response = self
            .request(Method::POST, &path)
            .query(&[
                ("refresh", "true"),
                ("wait_for_completion", "true"),
                ("conflicts", conflicts.as_str()),
            ])
            .timeout(self.by_query_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|source| StoreError::Transport { operation, source })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| StoreError::Transport { operation, source })?;

        // Version conflicts with conflicts=abort come back as 409 together
        // with a complete progress report.
        if status.is_success() || status == StatusCode::CONFLICT {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                if value.get("failures").is_some() || status.is_success() {
                    return parse_by_query(operation, affected_key, &value);
                }
            }
        }
        Err(http_error(operation, status, &text))
    }
}

#[async_trait]
impl DocumentStore for ElasticStore {
    fn describe(&self) -> String {
        self.endpoint.clone()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let result = self.send("ping", self.request(Method::GET, "/")).await;
        match result {
            Ok(info) => {
                debug!(
                    cluster = info["cluster_name"].as_str().unwrap_or("?"),
                    version = info["version"]["number"].as_str().unwrap_or("?"),
                    "store reachable"
                );
                Ok(())
            }
            Err(e) => Err(StoreError::Unreachable {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError> {
        let operation = "list collections";
        let value = self
            .send(
                operation,
                self.request(Method::GET, "/_cat/indices")
                    .query(&[("format", "json"), ("h", "index,docs.count")]),
            )
            .await?;
        let rows = value.as_array().ok_or_else(|| StoreError::Malformed {
            operation,
            detail: "expected a JSON array".to_string(),
        })?;

        let mut collections: Vec<CollectionInfo> = rows
            .iter()
            .filter_map(|row| {
                let name = row.get("index")?.as_str()?;
                if name.starts_with('.') {
                    return None;
                }
                let doc_count = match row.get("docs.count") {
                    Some(Value::String(s)) => s.parse().ok(),
                    Some(Value::Number(n)) => n.as_u64(),
                    _ => None,
                };
                Some(CollectionInfo {
                    name: name.to_string(),
                    doc_count,
                })
            })
            .collect();
        collections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(collections)
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: Option<&Value>,
    ) -> Result<bool, StoreError> {
        let operation = "create collection";
        let path = format!("/{}", name);
        let head = self
            .request(Method::HEAD, &path)
            .send()
            .await
            .map_err(|source| StoreError::Transport { operation, source })?;
        if head.status().is_success() {
            return Ok(false);
        }
        if head.status() != StatusCode::NOT_FOUND {
            return Err(http_error(operation, head.status(), ""));
        }

        let mut put = self.request(Method::PUT, &path);
        if let Some(body) = schema {
            put = put.json(body);
        }
        match self.send(operation, put).await {
            Ok(_) => Ok(true),
            // lost a race with another creator
            Err(StoreError::Http { reason, .. })
                if reason.starts_with("resource_already_exists_exception") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn open_scroll(
        &self,
        collection: &str,
        page_size: usize,
        keep_alive: &str,
    ) -> Result<ScrollPage, StoreError> {
        let operation = "open scroll";
        let value = self
            .send(
                operation,
                self.request(Method::POST, &format!("/{}/_search", collection))
                    .query(&[("scroll", keep_alive)])
                    .json(&json!({ "size": page_size, "sort": ["_doc"] })),
            )
            .await?;
        let page = parse_scroll_page(operation, &value)?;
        self.track_scroll(None, page.cursor.as_deref());
        Ok(page)
    }

    async fn next_scroll_page(
        &self,
        cursor: &str,
        keep_alive: &str,
    ) -> Result<ScrollPage, StoreError> {
        let operation = "scroll";
        let result = self
            .send(
                operation,
                self.request(Method::POST, "/_search/scroll")
                    .json(&json!({ "scroll": keep_alive, "scroll_id": cursor })),
            )
            .await;

        let value = match result {
            Ok(v) => v,
            Err(StoreError::Http { status: 404, reason, .. }) => {
                self.track_scroll(Some(cursor), None);
                return Err(StoreError::CursorExpired(reason));
            }
            Err(e) => return Err(e),
        };
        let page = parse_scroll_page(operation, &value)?;
        self.track_scroll(Some(cursor), page.cursor.as_deref());
        Ok(page)
    }

    async fn clear_scroll(&self, cursor: &str) -> Result<(), StoreError> {
        self.track_scroll(Some(cursor), None);
        let result = self
            .send(
                "clear scroll",
                self.request(Method::DELETE, "/_search/scroll")
                    .json(&json!({ "scroll_id": [cursor] })),
            )
            .await;
        match result {
            Ok(_) | Err(StoreError::Http { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn bulk_index(&self, items: &[BulkItem]) -> Result<Vec<ItemOutcome>, StoreError> {
        let operation = "bulk";
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let body = render_bulk(items).map_err(|e| StoreError::Malformed {
            operation,
            detail: e.to_string(),
        })?;
        let value = self
            .send(
                operation,
                self.request(Method::POST, "/_bulk")
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
            )
            .await?;
        parse_bulk_response(items.len(), &value)
    }

    async fn update_by_query(
        &self,
        collection: &str,
        query: &Query,
        script: &PatchScript,
        conflicts: Conflicts,
    ) -> Result<ByQueryResponse, StoreError> {
        self.by_query(
            "update by query",
            "updated",
            format!("/{}/_update_by_query", collection),
            conflicts,
            json!({ "query": query.to_dsl(), "script": script.to_painless() }),
        )
        .await
    }

    async fn delete_by_query(
        &self,
        collection: &str,
        query: &Query,
        conflicts: Conflicts,
    ) -> Result<ByQueryResponse, StoreError> {
        self.by_query(
            "delete by query",
            "deleted",
            format!("/{}/_delete_by_query", collection),
            conflicts,
            json!({ "query": query.to_dsl() }),
        )
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        let cursors: Vec<String> = self
            .live_scrolls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for cursor in cursors {
            if let Err(e) = self.clear_scroll(&cursor).await {
                warn!(error = %e, "failed to release scroll cursor on close");
            }
        }
        Ok(())
    }
}

/// `error.type: error.reason` from an error body, falling back to raw text.
fn http_error(operation: &'static str, status: StatusCode, body: &str) -> StoreError {
    let reason = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").map(describe_cause))
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("no body").to_string()
            } else {
                body.chars().take(512).collect()
            }
        });
    StoreError::Http {
        operation,
        status: status.as_u16(),
        reason,
    }
}

fn describe_cause(cause: &Value) -> String {
    match cause {
        Value::String(s) => s.clone(),
        Value::Object(obj) => {
            let kind = obj.get("type").and_then(Value::as_str);
            let reason = obj.get("reason").and_then(Value::as_str);
            match (kind, reason) {
                (Some(k), Some(r)) => format!("{}: {}", k, r),
                (Some(k), None) => k.to_string(),
                (None, Some(r)) => r.to_string(),
                (None, None) => cause.to_string(),
            }
        }
        other => other.to_string(),
    }
}

fn parse_scroll_page(operation: &'static str, value: &Value) -> Result<ScrollPage, StoreError> {
    let hits = value["hits"]["hits"]
        .as_array()
        .ok_or_else(|| StoreError::Malformed {
            operation,
            detail: "missing hits.hits".to_string(),
        })?;

    let documents = hits
        .iter()
        .map(|hit| Document {
            id: hit["_id"].as_str().map(str::to_string),
            source: hit["_source"].as_object().cloned().unwrap_or_default(),
        })
        .collect();

    Ok(ScrollPage {
        cursor: value["_scroll_id"].as_str().map(str::to_string),
        documents,
    })
}

/// Render NDJSON: one action line and one source line per item.
fn render_bulk(items: &[BulkItem]) -> serde_json::Result<String> {
    let mut body = String::new();
    for item in items {
        let mut action = Map::new();
        action.insert("_index".to_string(), Value::String(item.collection.clone()));
        if let Some(id) = &item.id {
            action.insert("_id".to_string(), Value::String(id.clone()));
        }
        body.push_str(&serde_json::to_string(&json!({ "index": action }))?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&item.source)?);
        body.push('\n');
    }
    Ok(body)
}

fn parse_bulk_response(expected: usize, value: &Value) -> Result<Vec<ItemOutcome>, StoreError> {
    let operation = "bulk";
    let items = value["items"].as_array().ok_or_else(|| StoreError::Malformed {
        operation,
        detail: "missing items".to_string(),
    })?;
    if items.len() != expected {
        return Err(StoreError::Malformed {
            operation,
            detail: format!("sent {} items, got {} results", expected, items.len()),
        });
    }

    Ok(items
        .iter()
        .map(|item| {
            // each entry is keyed by its action name
            let result = item
                .as_object()
                .and_then(|obj| obj.values().next())
                .cloned()
                .unwrap_or(Value::Null);
            let status = result["status"].as_u64().unwrap_or(0);
            if let Some(error) = result.get("error") {
                Err(describe_cause(error))
            } else if (200..300).contains(&status) {
                Ok(result["_id"].as_str().unwrap_or_default().to_string())
            } else {
                Err(format!("item status {}", status))
            }
        })
        .collect())
}

fn parse_by_query(
    operation: &'static str,
    affected_key: &str,
    value: &Value,
) -> Result<ByQueryResponse, StoreError> {
    if !value.is_object() {
        return Err(StoreError::Malformed {
            operation,
            detail: "expected a JSON object".to_string(),
        });
    }
    let affected = value
        .get(affected_key)
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let failures = value["failures"]
        .as_array()
        .map(|list| {
            list.iter()
                .map(|f| ServerFailure {
                    id: f["id"].as_str().map(str::to_string),
                    reason: f
                        .get("cause")
                        .or_else(|| f.get("reason"))
                        .map(describe_cause)
                        .unwrap_or_else(|| f.to_string()),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ByQueryResponse {
        total: value["total"].as_u64().unwrap_or(0),
        affected,
        version_conflicts: value["version_conflicts"].as_u64().unwrap_or(0),
        failures,
    })
}
