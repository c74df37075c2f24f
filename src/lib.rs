//! `sheet-ingest` turns uploaded spreadsheet files into queryable, normalized row records and
//! keeps per-upload and per-row outcomes so partial failures stay diagnosable.
//!
//! The primary entrypoint is [`ingestion::IngestionPipeline`]. A submission flows through:
//!
//! 1. [`validation::ValidationGate`]: extension allow-list, emptiness and size limit
//! 2. [`store::IngestionStore::save_upload`]: the upload is recorded as `pending`
//! 3. [`ingestion::excel::WorkbookReader`]: every sheet of the workbook, in workbook order
//! 4. [`ingestion::normalize::normalize_row`]: one ordered JSON-shaped payload per row
//! 5. [`store::IngestionStore::save_entries`]: all entries in one batch, then a terminal status
//!
//! ## What you can ingest
//!
//! Workbooks readable by `calamine` (`.xlsx`, `.xls`, `.xlsm`, `.xlsb`, `.ods`); which of these
//! are accepted is decided by [`config::IngestionConfig::allowed_extensions`] (default `.xls` and
//! `.xlsx`). The container is detected from the bytes, so a renamed file is still rejected as
//! unreadable.
//!
//! ## Status model
//!
//! | status | meaning |
//! |---|---|
//! | `pending` | recorded, not yet claimed |
//! | `processing` | one pipeline run owns it |
//! | `completed` | every row `ok` or `skipped` |
//! | `completed_with_errors` | at least one row `error`; other rows are stored |
//! | `failed` | unreadable file, no sheets, reader panic, or timeout; no rows stored |
//!
//! ## Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sheet_ingest::config::IngestionConfig;
//! use sheet_ingest::ingestion::{IngestionPipeline, PipelineOptions, UploadRequest};
//! use sheet_ingest::store::{IngestionStore, MemoryStore};
//! use sheet_ingest::types::UserId;
//! use sheet_ingest::validation::ValidationGate;
//!
//! # fn main() -> Result<(), sheet_ingest::IngestionError> {
//! let config = IngestionConfig::from_env()?;
//! let store = Arc::new(MemoryStore::new());
//! let pipeline = IngestionPipeline::new(store.clone(), PipelineOptions::from_config(&config));
//! let gate = ValidationGate::new(&config);
//!
//! let bytes = std::fs::read("budget.xlsx")?;
//! let report = pipeline.submit(
//!     &gate,
//!     UploadRequest {
//!         owner: UserId::from("user-1"),
//!         filename: "budget.xlsx".to_string(),
//!         content_handle: "uploads/20240115_093000_budget.xlsx".to_string(),
//!         bytes: &bytes,
//!     },
//! )?;
//! println!("status={} rows={}", report.status, report.total_rows());
//! for entry in store.entries(report.upload_id)? {
//!     println!("{}#{} {}", entry.sheet_name, entry.row_index, entry.payload.to_json_string().unwrap());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: allow-list, size limit, run timeout
//! - [`validation`]: pre-flight checks and file name sanitization
//! - [`ingestion`]: workbook reader, row normalizer, pipeline, observers
//! - [`store`]: upload/entry persistence contract and the in-memory store
//! - [`report`]: dashboard statistics, failure reports, column profiles
//! - [`types`]: data model
//! - [`error`]: error type used across the crate

pub mod config;
pub mod error;
pub mod ingestion;
pub mod report;
pub mod store;
pub mod types;
pub mod validation;

pub use error::{IngestionError, IngestionResult};
