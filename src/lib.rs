//! # Asset Pipeline
//!
//! Batch transforms for an IT-asset inventory kept in an
//! Elasticsearch-compatible document store.
//!
//! The pipeline reads every document of a source collection, derives a
//! risk classification and a system age from its lifecycle fields, and
//! either writes enriched copies into a new collection or patches the
//! derived fields in place. Documents without a usable hostname are
//! skipped on migration and purged from the source afterwards.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────┐
//! │ Scanner  │──▶│ Enricher │──▶│ BulkWriter │──▶│  target  │
//! │ (scroll) │   │ validate │   │  chunked   │   │collection│
//! └──────────┘   └──────────┘   └────────────┘   └──────────┘
//!
//!  update_fields  ── update-by-query (script) ──▶ source
//!  delete_invalid ── delete-by-query (filter) ──▶ source
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! apx ping                      # check the store is reachable
//! apx collections               # list collections and doc counts
//! apx transform                 # reindex → update fields → delete invalid
//! apx reindex --target it_asset_v2
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Document and field names |
//! | [`enrich`] | Risk level, system age, validity |
//! | [`query`] | Typed filter queries |
//! | [`script`] | In-place patch scripts |
//! | [`store`] | Document store abstraction and backends |
//! | [`scan`] | Paginated full-collection reads |
//! | [`bulk`] | Chunked bulk writes |
//! | [`reindex`] | Enriched migration to a new collection |
//! | [`update`] | In-place derived-field patch |
//! | [`delete`] | Removal of invalid documents |
//! | [`workflow`] | Stage sequencing and summaries |
//! | [`progress`] | Stage progress on stderr |
//! | [`logging`] | Tracing subscriber setup |

pub mod bulk;
pub mod collections;
pub mod config;
pub mod delete;
pub mod enrich;
pub mod error;
pub mod logging;
pub mod models;
pub mod progress;
pub mod query;
pub mod reindex;
pub mod scan;
pub mod script;
pub mod store;
pub mod update;
pub mod workflow;
