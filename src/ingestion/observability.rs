use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::IngestionError;
use crate::types::UploadId;

use super::pipeline::IngestionReport;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IngestionSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal, e.g. a row that failed to parse).
    Warning,
    /// Error-level event (the upload failed).
    Error,
    /// Critical error (I/O, timeouts, store invariants).
    Critical,
}

impl IngestionSeverity {
    /// Severity of an error surfaced by the pipeline.
    pub fn for_error(e: &IngestionError) -> Self {
        match e {
            IngestionError::Io(_)
            | IngestionError::Timeout { .. }
            | IngestionError::ReaderPanic { .. } => Self::Critical,
            IngestionError::UnreadableFormat { .. }
            | IngestionError::SheetRead { .. }
            | IngestionError::NoSheets => Self::Error,
            IngestionError::CellCoercion { .. } | IngestionError::Rejected(_) => Self::Warning,
            IngestionError::NotFound { .. }
            | IngestionError::ConstraintViolation { .. }
            | IngestionError::StatusConflict { .. }
            | IngestionError::InvalidTransition { .. }
            | IngestionError::UploadClosed { .. }
            | IngestionError::StorePoisoned => Self::Critical,
            IngestionError::Config { .. } => Self::Error,
        }
    }
}

/// Context about an ingestion run.
#[derive(Debug, Clone)]
pub struct IngestionContext {
    pub upload_id: UploadId,
    /// Original file name, when known.
    pub filename: Option<String>,
}

/// A row that could not be normalized.
#[derive(Debug, Clone, Copy)]
pub struct RowFailure<'a> {
    pub sheet: &'a str,
    pub row_index: usize,
    pub detail: &'a str,
}

/// Observer interface for ingestion outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait IngestionObserver: Send + Sync {
    /// Called when an ingestion run reaches `completed` or `completed_with_errors`.
    fn on_success(&self, _ctx: &IngestionContext, _report: &IngestionReport) {}

    /// Called for each row that failed normalization.
    fn on_row_error(&self, _ctx: &IngestionContext, _failure: RowFailure<'_>) {}

    /// Called when ingestion fails.
    fn on_failure(&self, _ctx: &IngestionContext, _severity: IngestionSeverity, _error: &IngestionError) {}

    /// Called when an ingestion failure meets an alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn IngestionObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn IngestionObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl IngestionObserver for CompositeObserver {
    fn on_success(&self, ctx: &IngestionContext, report: &IngestionReport) {
        for o in &self.observers {
            o.on_success(ctx, report);
        }
    }

    fn on_row_error(&self, ctx: &IngestionContext, failure: RowFailure<'_>) {
        for o in &self.observers {
            o.on_row_error(ctx, failure);
        }
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Emits ingestion events as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl IngestionObserver for TracingObserver {
    fn on_success(&self, ctx: &IngestionContext, report: &IngestionReport) {
        tracing::info!(
            upload_id = %ctx.upload_id,
            status = %report.status,
            sheets = report.sheets.len(),
            rows = report.total_rows(),
            errors = report.error_rows(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "ingestion finished"
        );
    }

    fn on_row_error(&self, ctx: &IngestionContext, failure: RowFailure<'_>) {
        tracing::debug!(
            upload_id = %ctx.upload_id,
            sheet = failure.sheet,
            row = failure.row_index,
            detail = failure.detail,
            "row failed to normalize"
        );
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        tracing::warn!(upload_id = %ctx.upload_id, ?severity, error = %error, "ingestion failed");
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        tracing::error!(upload_id = %ctx.upload_id, ?severity, error = %error, "ingestion alert");
    }
}

/// Appends ingestion events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl IngestionObserver for FileObserver {
    fn on_success(&self, ctx: &IngestionContext, report: &IngestionReport) {
        self.append_line(&format!(
            "{} ok upload={} status={} rows={} errors={}",
            Utc::now().timestamp(),
            ctx.upload_id,
            report.status,
            report.total_rows(),
            report.error_rows()
        ));
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.append_line(&format!(
            "{} fail severity={:?} upload={} err={}",
            Utc::now().timestamp(),
            severity,
            ctx.upload_id,
            error
        ));
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.append_line(&format!(
            "{} ALERT severity={:?} upload={} err={}",
            Utc::now().timestamp(),
            severity,
            ctx.upload_id,
            error
        ));
    }
}
