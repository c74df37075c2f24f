//! Ingestion entrypoints and implementations.
//!
//! Most callers should use [`IngestionPipeline`] (from [`pipeline`]) which:
//!
//! - claims a `pending` upload and drives it to a terminal status
//! - reads every sheet with [`excel::WorkbookReader`]
//! - normalizes each row with [`normalize::normalize_row`]
//! - optionally reports success/failure/alerts to an [`IngestionObserver`]

pub mod excel;
pub mod normalize;
pub mod observability;
pub mod pipeline;

pub use excel::{SheetIter, WorkbookReader, clean_header};
pub use normalize::{Normalized, column_keys, normalize_cell, normalize_row};
pub use observability::{
    CompositeObserver, FileObserver, IngestionContext, IngestionObserver, IngestionSeverity, RowFailure,
    TracingObserver,
};
pub use pipeline::{IngestionPipeline, IngestionReport, PipelineOptions, SheetReport, UploadRequest};
