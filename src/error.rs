use thiserror::Error;

use crate::types::{UploadId, UploadStatus};
use crate::validation::Rejection;

/// Convenience result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Error type returned across validation, reading, normalization and storage.
///
/// Variants fall into the four failure classes of the pipeline:
///
/// - pre-flight: [`IngestionError::Rejected`]
/// - upload-fatal: [`IngestionError::UnreadableFormat`], [`IngestionError::SheetRead`],
///   [`IngestionError::ReaderPanic`], [`IngestionError::NoSheets`], [`IngestionError::Timeout`],
///   [`IngestionError::Io`]
/// - row-level: [`IngestionError::CellCoercion`]
/// - store-level: [`IngestionError::NotFound`], [`IngestionError::ConstraintViolation`],
///   [`IngestionError::StatusConflict`], [`IngestionError::InvalidTransition`],
///   [`IngestionError::UploadClosed`], [`IngestionError::StorePoisoned`]
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Underlying I/O error while reading the uploaded byte stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream is not a valid spreadsheet container.
    #[error("unreadable spreadsheet: {message}")]
    UnreadableFormat { message: String },

    /// A sheet could not be read after the workbook was opened.
    #[error("failed to read sheet '{sheet}': {message}")]
    SheetRead { sheet: String, message: String },

    /// The spreadsheet parser panicked on malformed input.
    #[error("spreadsheet reader panicked: {message}")]
    ReaderPanic { message: String },

    /// The workbook opened but contains no sheets.
    #[error("workbook contains no sheets")]
    NoSheets,

    /// A cell's raw content cannot be represented in a normalized payload.
    #[error("cannot coerce column '{column}': {message} (raw='{raw}')")]
    CellCoercion {
        column: String,
        raw: String,
        message: String,
    },

    /// The upload was refused before any record was created.
    #[error("upload rejected: {0}")]
    Rejected(Rejection),

    /// No upload exists with this id (or it belongs to another user).
    #[error("upload {upload_id} not found")]
    NotFound { upload_id: UploadId },

    /// Duplicate `(upload, sheet, row_index)` key.
    #[error("constraint violation on upload {upload_id}: duplicate row {row_index} in sheet '{sheet}'")]
    ConstraintViolation {
        upload_id: UploadId,
        sheet: String,
        row_index: usize,
    },

    /// A compare-and-set status update found a different current status.
    #[error("upload {upload_id} status is {actual}, expected {expected}")]
    StatusConflict {
        upload_id: UploadId,
        expected: UploadStatus,
        actual: UploadStatus,
    },

    /// The requested status change is not an edge of the upload state machine.
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: UploadStatus, to: UploadStatus },

    /// Entries may only be written while an upload is `processing`.
    #[error("upload {upload_id} does not accept entries in status {status}")]
    UploadClosed {
        upload_id: UploadId,
        status: UploadStatus,
    },

    /// The ingestion run exceeded its maximum duration.
    #[error("ingestion timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u128 },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The store's lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    StorePoisoned,
}

impl From<calamine::Error> for IngestionError {
    fn from(e: calamine::Error) -> Self {
        match e {
            calamine::Error::Io(io) => Self::Io(io),
            other => Self::UnreadableFormat {
                message: other.to_string(),
            },
        }
    }
}
