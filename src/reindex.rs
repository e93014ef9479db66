//! Migrate enriched documents into a new collection.
//!
//! Flow: ensure the target exists → scan the source → drop documents that
//! fail [`enrich::is_valid`] → [`enrich::enrich`] the rest → write them to
//! the target through a [`BulkWriter`].
//!
//! Target documents get fresh store-assigned ids, so running this twice
//! against an unchanged source leaves two full copies in the target. There
//! is no deduplication by source identity.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::bulk::{BulkWriter, WriteFailure};
use crate::enrich;
use crate::error::PipelineError;
use crate::models::Document;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::scan::{ScanOptions, Scanner};
use crate::store::{BulkItem, DocumentStore};

#[derive(Debug, Clone)]
pub struct ReindexOptions {
    pub source: String,
    pub target: String,
    pub scan: ScanOptions,
    pub chunk_size: usize,
    /// Body used when the target has to be created.
    pub target_schema: Option<Value>,
}

impl ReindexOptions {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            scan: ScanOptions::default(),
            chunk_size: crate::bulk::DEFAULT_CHUNK_SIZE,
            target_schema: Some(default_target_schema()),
        }
    }
}

/// Mapping hints for the derived fields; everything else maps dynamically.
pub fn default_target_schema() -> Value {
    json!({
        "mappings": {
            "properties": {
                "risk_level": { "type": "keyword" },
                "system_age_years": { "type": "integer" },
                "transformation_timestamp": { "type": "date" }
            }
        }
    })
}

#[derive(Debug, Default)]
pub struct ReindexReport {
    pub scanned: u64,
    pub written: u64,
    pub skipped: u64,
    pub failures: Vec<WriteFailure>,
    pub created_target: bool,
    /// Why the run stopped early; the counts above are final either way.
    pub aborted: Option<PipelineError>,
}

impl ReindexReport {
    pub fn completed(&self) -> bool {
        self.aborted.is_none()
    }
}

pub async fn run_reindex(
    store: &dyn DocumentStore,
    options: &ReindexOptions,
    progress: &dyn ProgressReporter,
) -> ReindexReport {
    let mut report = ReindexReport::default();

    match store
        .create_collection(&options.target, options.target_schema.as_ref())
        .await
    {
        Ok(created) => {
            report.created_target = created;
            if created {
                info!(target_collection = %options.target, "created target collection");
            }
        }
        Err(source) => {
            report.aborted = Some(PipelineError::ServerOperation {
                stage: "create target",
                collection: options.target.clone(),
                source,
            });
            return report;
        }
    }

    let mut scanner = Scanner::new(store, &options.source, options.scan.clone());
    let mut writer = BulkWriter::new(store, options.chunk_size);

    loop {
        let page = match scanner.next_page().await {
            Ok(Some(page)) => page,
            Ok(None) => break,
            Err(source) => {
                warn!(source_collection = %options.source, error = %source, "scan aborted");
                report.aborted = Some(PipelineError::Scan {
                    collection: options.source.clone(),
                    scanned: scanner.scanned(),
                    source,
                });
                break;
            }
        };
        report.scanned = scanner.scanned();
        progress.report(ProgressEvent::Scanning {
            collection: options.source.clone(),
            scanned: report.scanned,
        });

        for doc in page {
            if !enrich::is_valid(&doc) {
                report.skipped += 1;
                continue;
            }
            let enriched = enrich::enrich(&doc, Utc::now());
            if writer.stage(target_item(&options.target, enriched)).await.is_some() {
                report_writes(progress, &options.target, &writer);
            }
        }
    }

    // whatever was staged before an abort is still written
    let buffered = writer.buffered() > 0;
    let bulk = writer.finish().await;
    if buffered {
        progress.report(ProgressEvent::Writing {
            collection: options.target.clone(),
            written: bulk.succeeded,
            failed: bulk.failed(),
        });
    }

    report.written = bulk.succeeded;
    report.failures = bulk.failures;
    info!(
        source_collection = %options.source,
        target_collection = %options.target,
        scanned = report.scanned,
        written = report.written,
        skipped = report.skipped,
        failed = report.failures.len(),
        "reindex finished"
    );
    report
}

/// Strip the source id so the target assigns its own.
fn target_item(target: &str, mut doc: Document) -> BulkItem {
    doc.id = None;
    BulkItem::index(target, doc)
}

fn report_writes(progress: &dyn ProgressReporter, target: &str, writer: &BulkWriter<'_>) {
    progress.report(ProgressEvent::Writing {
        collection: target.to_string(),
        written: writer.report().succeeded,
        failed: writer.report().failed(),
    });
}
