//! Top-level transform workflow.
//!
//! Runs the selected stages in the fixed order reindex → update fields →
//! delete invalid. Only a failed ping stops the workflow; a failing stage
//! is reported as zero progress and the next stage runs regardless. No
//! stage is rolled back or retried.

use std::fmt::Write as _;

use chrono::Utc;
use tracing::{error, info};

use crate::config::TransformConfig;
use crate::error::PipelineError;
use crate::progress::ProgressReporter;
use crate::reindex::{run_reindex, ReindexOptions, ReindexReport};
use crate::scan::ScanOptions;
use crate::store::{ByQueryResponse, Conflicts, DocumentStore};
use crate::update::{run_field_update, UpdateOptions};
use crate::{delete, reindex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reindex,
    UpdateFields,
    DeleteInvalid,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Reindex, Stage::UpdateFields, Stage::DeleteInvalid];
}

#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub reindex: ReindexOptions,
    pub update: UpdateOptions,
    pub delete_conflicts: Conflicts,
}

impl WorkflowOptions {
    pub fn from_config(transform: &TransformConfig) -> Self {
        let scan = ScanOptions {
            page_size: transform.scan_page_size,
            keep_alive: transform.scroll_keep_alive.clone(),
        };
        let conflicts = Conflicts::from_proceed(transform.proceed_on_conflicts);
        Self {
            reindex: ReindexOptions {
                source: transform.source_collection.clone(),
                target: transform.target_collection.clone(),
                scan: scan.clone(),
                chunk_size: transform.bulk_chunk_size,
                target_schema: Some(reindex::default_target_schema()),
            },
            update: UpdateOptions {
                collection: transform.source_collection.clone(),
                mode: transform.update_mode,
                conflicts,
                scan,
                chunk_size: transform.bulk_chunk_size,
            },
            delete_conflicts: conflicts,
        }
    }

    pub fn source(&self) -> &str {
        &self.reindex.source
    }
}

pub type StageResult = Result<ByQueryResponse, PipelineError>;

/// What each stage that ran reported. `None` means the stage was not selected.
#[derive(Debug, Default)]
pub struct WorkflowSummary {
    pub reindex: Option<ReindexReport>,
    pub update: Option<StageResult>,
    pub delete: Option<StageResult>,
}

impl WorkflowSummary {
    pub fn updated(&self) -> u64 {
        affected(&self.update)
    }

    pub fn deleted(&self) -> u64 {
        affected(&self.delete)
    }

    /// True when every selected stage finished without an error.
    pub fn clean(&self) -> bool {
        self.reindex.as_ref().map_or(true, ReindexReport::completed)
            && !matches!(self.update, Some(Err(_)))
            && !matches!(self.delete, Some(Err(_)))
    }
}

fn affected(result: &Option<StageResult>) -> u64 {
    match result {
        Some(Ok(r)) => r.affected,
        _ => 0,
    }
}

/// Run all three stages.
pub async fn run_workflow(
    store: &dyn DocumentStore,
    options: &WorkflowOptions,
    progress: &dyn ProgressReporter,
) -> Result<WorkflowSummary, PipelineError> {
    run_stages(store, options, &Stage::ALL, progress).await
}

/// Ping, then run `stages` in the fixed workflow order.
pub async fn run_stages(
    store: &dyn DocumentStore,
    options: &WorkflowOptions,
    stages: &[Stage],
    progress: &dyn ProgressReporter,
) -> Result<WorkflowSummary, PipelineError> {
    store.ping().await.map_err(PipelineError::Connectivity)?;
    info!(store = %store.describe(), "connected");

    let mut summary = WorkflowSummary::default();

    if stages.contains(&Stage::Reindex) {
        let report = run_reindex(store, &options.reindex, progress).await;
        if let Some(e) = &report.aborted {
            error!(error = %e, "reindex stopped early");
        }
        summary.reindex = Some(report);
    }

    if stages.contains(&Stage::UpdateFields) {
        let result = run_field_update(store, &options.update, Utc::now(), progress).await;
        if let Err(e) = &result {
            error!(error = %e, "field update failed");
        }
        summary.update = Some(result);
    }

    if stages.contains(&Stage::DeleteInvalid) {
        let result = delete::run_delete_invalid(
            store,
            options.source(),
            options.delete_conflicts,
            progress,
        )
        .await;
        if let Err(e) = &result {
            error!(error = %e, "delete failed");
        }
        summary.delete = Some(result);
    }

    Ok(summary)
}

/// Per-stage summary in the CLI's plain-text format.
pub fn render_summary(options: &WorkflowOptions, summary: &WorkflowSummary) -> String {
    let mut out = String::new();

    if let Some(r) = &summary.reindex {
        let _ = writeln!(
            out,
            "reindex {} -> {}",
            options.reindex.source, options.reindex.target
        );
        let _ = writeln!(out, "  scanned: {}", r.scanned);
        let _ = writeln!(out, "  written: {}", r.written);
        let _ = writeln!(out, "  skipped invalid: {}", r.skipped);
        let _ = writeln!(out, "  write failures: {}", r.failures.len());
        for f in r.failures.iter().take(5) {
            let _ = writeln!(out, "    - {}", f.reason);
        }
        if let Some(e) = &r.aborted {
            let _ = writeln!(out, "  error: {}", e);
        }
    }

    if let Some(result) = &summary.update {
        let _ = writeln!(out, "update fields {}", options.update.collection);
        render_by_query(&mut out, "updated", result);
    }

    if let Some(result) = &summary.delete {
        let _ = writeln!(out, "delete invalid {}", options.source());
        render_by_query(&mut out, "deleted", result);
    }

    let _ = writeln!(out, "{}", if summary.clean() { "ok" } else { "completed with errors" });
    out
}

fn render_by_query(out: &mut String, verb: &str, result: &StageResult) {
    match result {
        Ok(r) => {
            let _ = writeln!(out, "  {}: {}", verb, r.affected);
            let _ = writeln!(out, "  failures: {}", r.failures.len());
            if r.version_conflicts > 0 {
                let _ = writeln!(out, "  version conflicts: {}", r.version_conflicts);
            }
        }
        Err(e) => {
            let _ = writeln!(out, "  {}: 0", verb);
            let _ = writeln!(out, "  error: {}", e);
        }
    }
}
