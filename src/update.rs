//! Patch derived fields into the source collection in place.
//!
//! Every document is patched, valid or not. In [`UpdateMode::Scripted`]
//! this is a single update-by-query over the whole collection, evaluated by
//! the store with the script from [`PatchScript`]. [`UpdateMode::Client`]
//! streams the collection instead, applies the same patch locally and
//! writes each document back under its own id.
//!
//! Either way the caller gets one report at the end; nothing is retried.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::bulk::BulkWriter;
use crate::config::UpdateMode;
use crate::error::PipelineError;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::query::Query;
use crate::scan::{ScanOptions, Scanner};
use crate::script::PatchScript;
use crate::store::{BulkItem, ByQueryResponse, Conflicts, DocumentStore, ServerFailure};

const STAGE: &str = "update fields";

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub collection: String,
    pub mode: UpdateMode,
    pub conflicts: Conflicts,
    /// Used by the client-side mode only.
    pub scan: ScanOptions,
    pub chunk_size: usize,
}

impl UpdateOptions {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            mode: UpdateMode::Scripted,
            conflicts: Conflicts::Abort,
            scan: ScanOptions::default(),
            chunk_size: crate::bulk::DEFAULT_CHUNK_SIZE,
        }
    }
}

pub async fn run_field_update(
    store: &dyn DocumentStore,
    options: &UpdateOptions,
    now: DateTime<Utc>,
    progress: &dyn ProgressReporter,
) -> Result<ByQueryResponse, PipelineError> {
    let script = PatchScript::derived_fields(now);
    let response = match options.mode {
        UpdateMode::Scripted => {
            progress.report(ProgressEvent::Waiting {
                stage: STAGE.to_string(),
                collection: options.collection.clone(),
            });
            store
                .update_by_query(&options.collection, &Query::MatchAll, &script, options.conflicts)
                .await
                .map_err(|source| PipelineError::ServerOperation {
                    stage: STAGE,
                    collection: options.collection.clone(),
                    source,
                })?
        }
        UpdateMode::Client => patch_client_side(store, options, &script, progress).await?,
    };

    info!(
        collection = %options.collection,
        updated = response.affected,
        failures = response.failures.len(),
        "field update finished"
    );
    Ok(response)
}

async fn patch_client_side(
    store: &dyn DocumentStore,
    options: &UpdateOptions,
    script: &PatchScript,
    progress: &dyn ProgressReporter,
) -> Result<ByQueryResponse, PipelineError> {
    let mut scanner = Scanner::new(store, &options.collection, options.scan.clone());
    let mut writer = BulkWriter::new(store, options.chunk_size);
    let mut response = ByQueryResponse::default();

    loop {
        let page = match scanner.next_page().await {
            Ok(Some(page)) => page,
            Ok(None) => break,
            Err(source) => {
                return Err(PipelineError::Scan {
                    collection: options.collection.clone(),
                    scanned: scanner.scanned(),
                    source,
                })
            }
        };
        progress.report(ProgressEvent::Scanning {
            collection: options.collection.clone(),
            scanned: scanner.scanned(),
        });

        for mut doc in page {
            response.total += 1;
            if doc.id.is_none() {
                response.failures.push(ServerFailure {
                    id: None,
                    reason: "scanned document has no id".to_string(),
                });
                continue;
            }
            script.apply(&mut doc);
            if writer.stage(BulkItem::index(&options.collection, doc)).await.is_some() {
                progress.report(ProgressEvent::Writing {
                    collection: options.collection.clone(),
                    written: writer.report().succeeded,
                    failed: writer.report().failed(),
                });
            }
        }
    }

    let bulk = writer.finish().await;
    response.affected = bulk.succeeded;
    response
        .failures
        .extend(bulk.failures.into_iter().map(|f| ServerFailure {
            id: f.document.id,
            reason: f.reason,
        }));
    Ok(response)
}
