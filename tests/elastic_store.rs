//! Wire-level tests for the HTTP store against a mock server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query as QueryParams, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, head, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use asset_pipeline::config::{Config, StoreConfig};
use asset_pipeline::models::Document;
use asset_pipeline::query::Query;
use asset_pipeline::script::PatchScript;
use asset_pipeline::store::elastic::ElasticStore;
use asset_pipeline::store::{BulkItem, Conflicts, DocumentStore, StoreError};

#[derive(Default)]
struct Recorded {
    auth: Vec<String>,
    created: Vec<(String, Value)>,
    scroll_params: Vec<HashMap<String, String>>,
    cleared: Vec<Value>,
    bulk_bodies: Vec<String>,
    by_query: Vec<(String, HashMap<String, String>, Value)>,
}

type Shared = Arc<Mutex<Recorded>>;

fn error_body(kind: &str, reason: &str) -> Json<Value> {
    Json(json!({ "error": { "type": kind, "reason": reason }, "status": 400 }))
}

async fn root(State(rec): State<Shared>, headers: HeaderMap) -> Json<Value> {
    if let Some(auth) = headers.get("authorization") {
        rec.lock().unwrap().auth.push(auth.to_str().unwrap().to_string());
    }
    Json(json!({ "cluster_name": "mock", "version": { "number": "8.13.0" } }))
}

async fn head_index(Path(index): Path<String>) -> StatusCode {
    if index == "existing" {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn put_index(
    State(rec): State<Shared>,
    Path(index): Path<String>,
    body: String,
) -> (StatusCode, Json<Value>) {
    if index == "racing" {
        return (
            StatusCode::BAD_REQUEST,
            error_body("resource_already_exists_exception", "index [racing] already exists"),
        );
    }
    let schema = serde_json::from_str(&body).unwrap_or(Value::Null);
    rec.lock().unwrap().created.push((index, schema));
    (StatusCode::OK, Json(json!({ "acknowledged": true })))
}

fn hit(id: &str, hostname: &str) -> Value {
    json!({ "_id": id, "_source": { "hostname": hostname } })
}

async fn open_scroll(
    State(rec): State<Shared>,
    Path(index): Path<String>,
    QueryParams(params): QueryParams<HashMap<String, String>>,
    body: String,
) -> (StatusCode, Json<Value>) {
    if index == "missing" {
        return (
            StatusCode::NOT_FOUND,
            error_body("index_not_found_exception", "no such index [missing]"),
        );
    }
    let mut params = params;
    let body: Value = serde_json::from_str(&body).unwrap();
    params.insert("size".to_string(), body["size"].to_string());
    params.insert("sort".to_string(), body["sort"].to_string());
    rec.lock().unwrap().scroll_params.push(params);
    (
        StatusCode::OK,
        Json(json!({
            "_scroll_id": "c1",
            "hits": { "hits": [hit("a", "host-a"), hit("b", "host-b")] }
        })),
    )
}

async fn continue_scroll(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    match body["scroll_id"].as_str() {
        Some("c1") => (
            StatusCode::OK,
            Json(json!({ "_scroll_id": "c2", "hits": { "hits": [hit("c", "host-c")] } })),
        ),
        Some("c2") => (
            StatusCode::OK,
            Json(json!({ "_scroll_id": "c2", "hits": { "hits": [] } })),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            error_body("search_context_missing_exception", "No search context found"),
        ),
    }
}

async fn clear_scroll(State(rec): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    rec.lock().unwrap().cleared.push(body["scroll_id"].clone());
    Json(json!({ "succeeded": true, "num_freed": 1 }))
}

async fn bulk(State(rec): State<Shared>, body: String) -> Json<Value> {
    rec.lock().unwrap().bulk_bodies.push(body.clone());
    let lines: Vec<Value> = body
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let items: Vec<Value> = lines
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| {
            if pair[1]["hostname"] == "bad" {
                json!({ "index": {
                    "status": 400,
                    "error": { "type": "mapper_parsing_exception", "reason": "failed to parse" }
                }})
            } else {
                let id = pair[0]["index"]["_id"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("gen-{}", i));
                json!({ "index": { "_id": id, "status": 201 } })
            }
        })
        .collect();
    Json(json!({ "errors": true, "items": items }))
}

async fn update_by_query(
    State(rec): State<Shared>,
    Path(index): Path<String>,
    QueryParams(params): QueryParams<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    rec.lock()
        .unwrap()
        .by_query
        .push((format!("{}/_update_by_query", index), params, body));
    if index == "conflicted" {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "total": 3,
                "updated": 2,
                "version_conflicts": 1,
                "failures": [{
                    "index": "conflicted",
                    "id": "x",
                    "cause": { "type": "version_conflict_engine_exception", "reason": "[x]: version conflict" },
                    "status": 409
                }]
            })),
        );
    }
    if index == "broken" {
        return (
            StatusCode::BAD_REQUEST,
            error_body("script_exception", "compile error"),
        );
    }
    (
        StatusCode::OK,
        Json(json!({ "total": 3, "updated": 3, "version_conflicts": 0, "failures": [] })),
    )
}

async fn delete_by_query(
    State(rec): State<Shared>,
    Path(index): Path<String>,
    QueryParams(params): QueryParams<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    rec.lock()
        .unwrap()
        .by_query
        .push((format!("{}/_delete_by_query", index), params, body));
    Json(json!({ "total": 1, "updated": 0, "deleted": 1, "version_conflicts": 0, "failures": [] }))
}

async fn cat_indices() -> Json<Value> {
    Json(json!([
        { "index": "it_asset_transformed", "docs.count": "2" },
        { "index": ".kibana_1", "docs.count": "9" },
        { "index": "it_asset", "docs.count": "3" }
    ]))
}

async fn mock_server() -> (String, Shared) {
    let rec: Shared = Arc::new(Mutex::new(Recorded::default()));
    let app = Router::new()
        .route("/", get(root))
        .route("/_cat/indices", get(cat_indices))
        .route("/_bulk", post(bulk))
        .route("/_search/scroll", post(continue_scroll).delete(clear_scroll))
        .route("/{index}", head(head_index).put(put_index))
        .route("/{index}/_search", post(open_scroll))
        .route("/{index}/_update_by_query", post(update_by_query))
        .route("/{index}/_delete_by_query", post(delete_by_query))
        .with_state(rec.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), rec)
}

/// Store config whose credential variables are never set.
fn anonymous(endpoint: &str) -> StoreConfig {
    let mut store = Config::for_endpoint(endpoint).store;
    store.api_key_env = "APX_TEST_UNSET_API_KEY".to_string();
    store
}

#[tokio::test]
async fn ping_sends_api_key() {
    let (url, rec) = mock_server().await;
    let mut config = anonymous(&url);
    config.api_key_env = "APX_TEST_ELASTIC_API_KEY".to_string();
    std::env::set_var("APX_TEST_ELASTIC_API_KEY", "s3cr3t");

    let store = ElasticStore::open(&config).unwrap();
    store.ping().await.unwrap();

    assert_eq!(rec.lock().unwrap().auth, vec!["ApiKey s3cr3t".to_string()]);
}

#[tokio::test]
async fn ping_without_server_is_unreachable() {
    // bind and drop to get a port nobody listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let store = ElasticStore::open(&anonymous(&format!("http://127.0.0.1:{}", port))).unwrap();
    let err = store.ping().await.unwrap_err();

    assert!(matches!(err, StoreError::Unreachable { .. }));
}

#[tokio::test]
async fn lists_collections_without_system_indices() {
    let (url, _rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();

    let collections = store.list_collections().await.unwrap();

    let names: Vec<&str> = collections.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["it_asset", "it_asset_transformed"]);
    assert_eq!(collections[0].doc_count, Some(3));
}

#[tokio::test]
async fn create_collection_checks_before_creating() {
    let (url, rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();
    let schema = json!({ "mappings": { "properties": { "risk_level": { "type": "keyword" } } } });

    assert!(!store.create_collection("existing", Some(&schema)).await.unwrap());
    assert!(store.create_collection("fresh", Some(&schema)).await.unwrap());
    assert!(!store.create_collection("racing", None).await.unwrap());

    let created = rec.lock().unwrap().created.clone();
    assert_eq!(created, vec![("fresh".to_string(), schema)]);
}

#[tokio::test]
async fn scroll_pages_until_empty_then_clears() {
    let (url, rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();

    let first = store.open_scroll("it_asset", 2, "5m").await.unwrap();
    assert_eq!(first.cursor.as_deref(), Some("c1"));
    assert_eq!(first.documents.len(), 2);
    assert_eq!(first.documents[0].id.as_deref(), Some("a"));
    assert_eq!(first.documents[0].field("hostname"), Some(&json!("host-a")));

    let second = store.next_scroll_page("c1", "5m").await.unwrap();
    assert_eq!(second.documents.len(), 1);
    let third = store.next_scroll_page("c2", "5m").await.unwrap();
    assert!(third.documents.is_empty());
    store.clear_scroll("c2").await.unwrap();

    let rec = rec.lock().unwrap();
    let params = &rec.scroll_params[0];
    assert_eq!(params["scroll"], "5m");
    assert_eq!(params["size"], "2");
    assert_eq!(params["sort"], r#"["_doc"]"#);
    assert_eq!(rec.cleared, vec![json!(["c2"])]);
}

#[tokio::test]
async fn scanner_reads_every_page() {
    let (url, rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();
    let scanner = asset_pipeline::scan::Scanner::new(
        &store,
        "it_asset",
        asset_pipeline::scan::ScanOptions::default(),
    );

    let docs: Vec<Document> = scanner.collect_all().await.unwrap();

    assert_eq!(docs.len(), 3);
    assert_eq!(rec.lock().unwrap().cleared.len(), 1);
}

#[tokio::test]
async fn unknown_cursor_is_expired() {
    let (url, _rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();

    let err = store.next_scroll_page("gone", "5m").await.unwrap_err();

    assert!(matches!(err, StoreError::CursorExpired(_)));
}

#[tokio::test]
async fn missing_index_reports_store_reason() {
    let (url, _rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();

    let err = store.open_scroll("missing", 10, "1m").await.unwrap_err();

    match err {
        StoreError::Http { status, reason, .. } => {
            assert_eq!(status, 404);
            assert_eq!(reason, "index_not_found_exception: no such index [missing]");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn close_releases_open_scrolls() {
    let (url, rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();
    store.open_scroll("it_asset", 2, "5m").await.unwrap();

    store.close().await.unwrap();

    assert_eq!(rec.lock().unwrap().cleared, vec![json!(["c1"])]);
}

#[tokio::test]
async fn bulk_reports_each_item() {
    let (url, rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();
    let items = vec![
        BulkItem::index("t", Document::from_value(json!({ "hostname": "good" }))),
        BulkItem::index("t", Document::from_value(json!({ "hostname": "bad" }))),
        BulkItem::index(
            "t",
            Document::with_id("keep-me", json!({ "hostname": "other" }).as_object().unwrap().clone()),
        ),
    ];

    let outcomes = store.bulk_index(&items).await.unwrap();

    assert_eq!(outcomes[0], Ok("gen-0".to_string()));
    assert_eq!(
        outcomes[1],
        Err("mapper_parsing_exception: failed to parse".to_string())
    );
    assert_eq!(outcomes[2], Ok("keep-me".to_string()));
    let body = rec.lock().unwrap().bulk_bodies[0].clone();
    assert_eq!(body.lines().count(), 6);
    assert!(body.ends_with('\n'));
}

#[tokio::test]
async fn update_by_query_sends_script_and_flags() {
    let (url, rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();
    let now = chrono::DateTime::parse_from_rfc3339("2026-10-14T12:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);

    let response = store
        .update_by_query(
            "it_asset",
            &Query::MatchAll,
            &PatchScript::derived_fields(now),
            Conflicts::Abort,
        )
        .await
        .unwrap();

    assert_eq!(response.affected, 3);
    let rec = rec.lock().unwrap();
    let (path, params, body) = &rec.by_query[0];
    assert_eq!(path, "it_asset/_update_by_query");
    assert_eq!(params["refresh"], "true");
    assert_eq!(params["wait_for_completion"], "true");
    assert_eq!(params["conflicts"], "abort");
    assert_eq!(body["query"], json!({ "match_all": {} }));
    assert_eq!(body["script"]["lang"], "painless");
    assert_eq!(body["script"]["params"]["today"], "2026-10-14");
    assert_eq!(body["script"]["params"]["now_millis"], 1_791_979_200_000i64);
}

#[tokio::test]
async fn conflict_report_is_returned_as_data() {
    let (url, _rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();
    let now = chrono::Utc::now();

    let response = store
        .update_by_query(
            "conflicted",
            &Query::MatchAll,
            &PatchScript::derived_fields(now),
            Conflicts::Abort,
        )
        .await
        .unwrap();

    assert_eq!(response.affected, 2);
    assert_eq!(response.version_conflicts, 1);
    assert_eq!(response.failures[0].id.as_deref(), Some("x"));
    assert!(response.failures[0]
        .reason
        .starts_with("version_conflict_engine_exception"));
}

#[tokio::test]
async fn rejected_script_is_an_http_error() {
    let (url, _rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();

    let err = store
        .update_by_query(
            "broken",
            &Query::MatchAll,
            &PatchScript::derived_fields(chrono::Utc::now()),
            Conflicts::Proceed,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Http { status: 400, .. }));
}

#[tokio::test]
async fn delete_by_query_sends_hostname_filter() {
    let (url, rec) = mock_server().await;
    let store = ElasticStore::open(&anonymous(&url)).unwrap();

    let response = store
        .delete_by_query(
            "it_asset",
            &asset_pipeline::delete::invalid_hostname_query(),
            Conflicts::Proceed,
        )
        .await
        .unwrap();

    assert_eq!(response.affected, 1);
    let rec = rec.lock().unwrap();
    let (path, params, body) = &rec.by_query[0];
    assert_eq!(path, "it_asset/_delete_by_query");
    assert_eq!(params["conflicts"], "proceed");
    let should = body["query"]["bool"]["should"].as_array().unwrap();
    assert_eq!(should.len(), 3);
    assert_eq!(
        should[0],
        json!({ "bool": { "must_not": [{ "exists": { "field": "hostname" } }] } })
    );
}
