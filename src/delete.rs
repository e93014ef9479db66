//! Remove documents with a missing or placeholder hostname.
//!
//! Matches `hostname` absent, `hostname.keyword == ""` or
//! `hostname.keyword == "Unknown"`. The comparison is exact: "unknown" or
//! "UNKNOWN" survive here even though [`crate::enrich::is_valid`] rejects
//! them. The two predicates are kept apart on purpose until the intended
//! behaviour is settled.

use tracing::info;

use crate::error::PipelineError;
use crate::models::HOSTNAME;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::query::{Query, KEYWORD_SUFFIX};
use crate::store::{ByQueryResponse, Conflicts, DocumentStore};

const STAGE: &str = "delete invalid";

pub const UNKNOWN_HOSTNAME: &str = "Unknown";

pub fn invalid_hostname_query() -> Query {
    let keyword = format!("{}{}", HOSTNAME, KEYWORD_SUFFIX);
    Query::any_of(vec![
        Query::not(Query::exists(HOSTNAME)),
        Query::term(&keyword, ""),
        Query::term(&keyword, UNKNOWN_HOSTNAME),
    ])
}

pub async fn run_delete_invalid(
    store: &dyn DocumentStore,
    collection: &str,
    conflicts: Conflicts,
    progress: &dyn ProgressReporter,
) -> Result<ByQueryResponse, PipelineError> {
    progress.report(ProgressEvent::Waiting {
        stage: STAGE.to_string(),
        collection: collection.to_string(),
    });
    let response = store
        .delete_by_query(collection, &invalid_hostname_query(), conflicts)
        .await
        .map_err(|source| PipelineError::ServerOperation {
            stage: STAGE,
            collection: collection.to_string(),
            source,
        })?;

    info!(
        collection,
        deleted = response.affected,
        failures = response.failures.len(),
        "delete finished"
    );
    Ok(response)
}
