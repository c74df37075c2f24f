//! The ingestion pipeline: reader + normalizer across every sheet of one upload.
//!
//! Most callers should use [`IngestionPipeline::submit`], which runs the
//! [`crate::validation::ValidationGate`], creates the `pending` upload and ingests it. Callers that
//! create uploads themselves use [`IngestionPipeline::ingest`].
//!
//! A run claims the upload with a compare-and-set `pending -> processing`, so at most one run can
//! be active per upload. Rows are normalized into staged entries; a row that fails becomes an
//! `error` entry and the run continues. Entries are committed in one batch at the end. Anything
//! that fails the read itself (bad container, sheet read error, reader panic, timeout) marks the
//! upload `failed` and discards the staged entries.

use std::fmt;
use std::io::Read;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;

use crate::config::IngestionConfig;
use crate::error::{IngestionError, IngestionResult};
use crate::store::IngestionStore;
use crate::types::{NewDataEntry, NewUpload, ParseOutcome, RawSheet, UploadId, UploadStatus, UserId};
use crate::validation::{ValidationGate, sanitize_filename};

use super::excel::WorkbookReader;
use super::normalize::{Normalized, normalize_row, raw_payload};
use super::observability::{IngestionContext, IngestionObserver, IngestionSeverity, RowFailure};

/// Options controlling a pipeline.
#[derive(Clone)]
pub struct PipelineOptions {
    /// Runs longer than this are failed with [`IngestionError::Timeout`].
    pub max_duration: Duration,
    /// Normalize the rows of each sheet on the rayon pool.
    pub parallel_rows: bool,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn IngestionObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: IngestionSeverity,
}

impl fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("max_duration", &self.max_duration)
            .field("parallel_rows", &self.parallel_rows)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

impl PipelineOptions {
    pub fn from_config(config: &IngestionConfig) -> Self {
        Self {
            max_duration: config.max_ingestion_duration(),
            parallel_rows: config.parallel_rows,
            observer: None,
            alert_at_or_above: IngestionSeverity::Critical,
        }
    }
}

/// Row counts for one sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SheetReport {
    pub name: String,
    pub rows: usize,
    pub ok: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Result of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub upload_id: UploadId,
    /// Terminal status the upload ended in.
    pub status: UploadStatus,
    /// Empty when the run failed.
    pub sheets: Vec<SheetReport>,
    pub error_summary: Option<String>,
    pub elapsed: Duration,
}

impl IngestionReport {
    pub fn total_rows(&self) -> usize {
        self.sheets.iter().map(|s| s.rows).sum()
    }

    pub fn ok_rows(&self) -> usize {
        self.sheets.iter().map(|s| s.ok).sum()
    }

    pub fn skipped_rows(&self) -> usize {
        self.sheets.iter().map(|s| s.skipped).sum()
    }

    pub fn error_rows(&self) -> usize {
        self.sheets.iter().map(|s| s.errors).sum()
    }
}

/// A named byte stream submitted by a user.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub owner: UserId,
    pub filename: String,
    /// Where the upload layer stored the bytes.
    pub content_handle: String,
    pub bytes: &'a [u8],
}

struct Staged {
    sheets: Vec<SheetReport>,
    entries: Vec<NewDataEntry>,
}

struct Deadline {
    start: Instant,
    max: Duration,
}

impl Deadline {
    fn check(&self) -> IngestionResult<()> {
        let elapsed = self.start.elapsed();
        if elapsed >= self.max {
            return Err(IngestionError::Timeout {
                elapsed_ms: elapsed.as_millis(),
            });
        }
        Ok(())
    }
}

/// Drives uploads from `pending` to a terminal status.
pub struct IngestionPipeline {
    store: Arc<dyn IngestionStore>,
    options: PipelineOptions,
}

impl fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn IngestionStore>, options: PipelineOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &Arc<dyn IngestionStore> {
        &self.store
    }

    /// Validate, record and ingest an uploaded file.
    ///
    /// The file name is reduced with [`sanitize_filename`] before it is checked and stored. A
    /// rejected file returns [`IngestionError::Rejected`] and creates no upload.
    pub fn submit(
        &self,
        gate: &ValidationGate,
        request: UploadRequest<'_>,
    ) -> IngestionResult<IngestionReport> {
        let filename = sanitize_filename(&request.filename);
        let byte_size = request.bytes.len() as u64;
        gate.check(&filename, byte_size)
            .into_result()
            .map_err(|rejection| {
                tracing::info!(%filename, %rejection, "upload rejected");
                IngestionError::Rejected(rejection)
            })?;

        let upload_id = self.store.save_upload(NewUpload {
            owner: request.owner,
            original_filename: filename,
            content_handle: request.content_handle,
            byte_size,
        })?;
        self.ingest(upload_id, request.bytes)
    }

    /// Ingest a spreadsheet byte stream into a `pending` upload.
    ///
    /// Upload-fatal problems (unreadable file, timeout, ...) are not errors here: they produce a
    /// report with status `failed`. `Err` is reserved for store-level failures, including
    /// [`IngestionError::StatusConflict`] when the upload is not `pending`.
    #[tracing::instrument(skip_all, fields(upload_id = %upload_id))]
    pub fn ingest(&self, upload_id: UploadId, source: impl Read) -> IngestionResult<IngestionReport> {
        self.run(upload_id, |pipeline, deadline| {
            let reader = WorkbookReader::open(source)?;
            tracing::debug!(sheets = reader.sheet_names().len(), "workbook opened");
            pipeline.stage_sheets(reader.into_sheets(), deadline)
        })
    }

    /// Ingest sheets from an already-opened source.
    #[tracing::instrument(skip_all, fields(upload_id = %upload_id))]
    pub fn ingest_sheets<I>(&self, upload_id: UploadId, sheets: I) -> IngestionResult<IngestionReport>
    where
        I: IntoIterator<Item = IngestionResult<RawSheet>>,
    {
        self.run(upload_id, |pipeline, deadline| pipeline.stage_sheets(sheets, deadline))
    }

    fn run<F>(&self, upload_id: UploadId, stage: F) -> IngestionResult<IngestionReport>
    where
        F: FnOnce(&Self, &Deadline) -> IngestionResult<Staged>,
    {
        let deadline = Deadline {
            start: Instant::now(),
            max: self.options.max_duration,
        };

        let upload = self.store.transition(
            upload_id,
            UploadStatus::Pending,
            UploadStatus::Processing,
            None,
        )?;
        let ctx = IngestionContext {
            upload_id,
            filename: Some(upload.original_filename),
        };
        tracing::info!("ingestion started");

        // Only reading and normalization run inside the unwind boundary; observers are called
        // after it.
        let staged = catch_unwind(AssertUnwindSafe(|| stage(self, &deadline)))
            .unwrap_or_else(|panic| {
                Err(IngestionError::ReaderPanic {
                    message: panic_message(panic.as_ref()),
                })
            });

        match staged {
            Ok(staged) => self.commit(&ctx, &deadline, staged),
            Err(e) => self.fail(&ctx, &deadline, e),
        }
    }

    fn stage_sheets<I>(&self, sheets: I, deadline: &Deadline) -> IngestionResult<Staged>
    where
        I: IntoIterator<Item = IngestionResult<RawSheet>>,
    {
        let mut staged = Staged {
            sheets: Vec::new(),
            entries: Vec::new(),
        };
        for sheet in sheets {
            let sheet = sheet?;
            deadline.check()?;
            let report = self.stage_sheet(&sheet, deadline, &mut staged.entries)?;
            staged.sheets.push(report);
        }
        if staged.sheets.is_empty() {
            return Err(IngestionError::NoSheets);
        }
        Ok(staged)
    }

    fn stage_sheet(
        &self,
        sheet: &RawSheet,
        deadline: &Deadline,
        entries: &mut Vec<NewDataEntry>,
    ) -> IngestionResult<SheetReport> {
        let outcomes: Vec<IngestionResult<Normalized>> = if self.options.parallel_rows {
            // `collect` on an indexed parallel iterator keeps source order.
            let outcomes: Vec<IngestionResult<Normalized>> = sheet
                .rows
                .par_iter()
                .map(|row| normalize_row(&sheet.header, row))
                .collect();
            deadline.check()?;
            outcomes
        } else {
            let mut outcomes = Vec::with_capacity(sheet.rows.len());
            for row in &sheet.rows {
                deadline.check()?;
                outcomes.push(normalize_row(&sheet.header, row));
            }
            outcomes
        };

        let mut report = SheetReport {
            name: sheet.name.clone(),
            rows: sheet.rows.len(),
            ..Default::default()
        };
        entries.reserve(outcomes.len());
        for (row_index, (row, outcome)) in sheet.rows.iter().zip(outcomes).enumerate() {
            match outcome {
                Ok(Normalized::Row(payload)) => {
                    report.ok += 1;
                    entries.push(NewDataEntry::ok(&sheet.name, row_index, payload));
                }
                Ok(Normalized::Skipped) => {
                    report.skipped += 1;
                    entries.push(NewDataEntry::skipped(&sheet.name, row_index, "blank row"));
                }
                Err(e) => {
                    report.errors += 1;
                    entries.push(NewDataEntry::error(
                        &sheet.name,
                        row_index,
                        raw_payload(&sheet.header, row),
                        e.to_string(),
                    ));
                }
            }
        }

        tracing::debug!(
            sheet = %report.name,
            rows = report.rows,
            ok = report.ok,
            skipped = report.skipped,
            errors = report.errors,
            "sheet staged"
        );
        Ok(report)
    }

    fn commit(
        &self,
        ctx: &IngestionContext,
        deadline: &Deadline,
        staged: Staged,
    ) -> IngestionResult<IngestionReport> {
        let upload_id = ctx.upload_id;
        let errors: usize = staged.sheets.iter().map(|s| s.errors).sum();
        let total: usize = staged.sheets.iter().map(|s| s.rows).sum();

        for entry in staged.entries.iter().filter(|e| e.outcome == ParseOutcome::Error) {
            let failure = RowFailure {
                sheet: &entry.sheet_name,
                row_index: entry.row_index,
                detail: entry.error_detail.as_deref().unwrap_or_default(),
            };
            self.notify(|obs| obs.on_row_error(ctx, failure));
        }

        if let Err(e) = self.store.save_entries(upload_id, staged.entries) {
            tracing::error!(error = %e, "failed to persist entries");
            self.notify_failure(ctx, &e);
            // Best effort: never leave the upload in `processing`.
            if let Err(close_err) = self.store.transition(
                upload_id,
                UploadStatus::Processing,
                UploadStatus::Failed,
                Some(format!("failed to persist entries: {e}")),
            ) {
                tracing::error!(error = %close_err, "failed to mark upload failed");
            }
            return Err(e);
        }

        let (status, error_summary) = if errors == 0 {
            (UploadStatus::Completed, None)
        } else {
            (
                UploadStatus::CompletedWithErrors,
                Some(format!("{errors} of {total} rows failed to parse")),
            )
        };
        let upload = self
            .store
            .transition(upload_id, UploadStatus::Processing, status, error_summary)?;

        let report = IngestionReport {
            upload_id,
            status: upload.status,
            sheets: staged.sheets,
            error_summary: upload.error_summary,
            elapsed: deadline.start.elapsed(),
        };
        tracing::info!(status = %report.status, rows = total, errors, "ingestion finished");
        self.notify(|obs| obs.on_success(ctx, &report));
        Ok(report)
    }

    fn fail(
        &self,
        ctx: &IngestionContext,
        deadline: &Deadline,
        error: IngestionError,
    ) -> IngestionResult<IngestionReport> {
        let summary = error.to_string();
        tracing::warn!(error = %summary, "ingestion failed; staged entries discarded");
        self.notify_failure(ctx, &error);

        let upload = self.store.transition(
            ctx.upload_id,
            UploadStatus::Processing,
            UploadStatus::Failed,
            Some(summary),
        )?;
        Ok(IngestionReport {
            upload_id: ctx.upload_id,
            status: upload.status,
            sheets: Vec::new(),
            error_summary: upload.error_summary,
            elapsed: deadline.start.elapsed(),
        })
    }

    fn notify_failure(&self, ctx: &IngestionContext, error: &IngestionError) {
        let sev = IngestionSeverity::for_error(error);
        self.notify(|obs| {
            obs.on_failure(ctx, sev, error);
            if sev >= self.options.alert_at_or_above {
                obs.on_alert(ctx, sev, error);
            }
        });
    }

    /// Invoke the observer, if any. A panicking observer is logged and ignored.
    fn notify(&self, f: impl FnOnce(&dyn IngestionObserver)) {
        let Some(obs) = self.options.observer.as_deref() else {
            return;
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(obs))) {
            tracing::error!(panic = %panic_message(panic.as_ref()), "ingestion observer panicked");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{ParseOutcome, RawCell};

    fn pending_upload(store: &MemoryStore) -> UploadId {
        store
            .save_upload(NewUpload {
                owner: UserId::from("u1"),
                original_filename: "book.xlsx".to_string(),
                content_handle: "book.xlsx".to_string(),
                byte_size: 1,
            })
            .unwrap()
    }

    fn sheet(name: &str, rows: Vec<Vec<RawCell>>) -> IngestionResult<RawSheet> {
        Ok(RawSheet::new(name, vec!["a".to_string(), "b".to_string()], rows))
    }

    fn ints(a: i64, b: i64) -> Vec<RawCell> {
        vec![RawCell::Int(a), RawCell::Int(b)]
    }

    #[test]
    fn parallel_rows_keep_source_order() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestionPipeline::new(
            store.clone(),
            PipelineOptions {
                parallel_rows: true,
                ..Default::default()
            },
        );
        let id = pending_upload(&store);
        let rows: Vec<Vec<RawCell>> = (0..500).map(|i| ints(i, i * 2)).collect();
        let report = pipeline.ingest_sheets(id, vec![sheet("S", rows)]).unwrap();
        assert_eq!(report.status, UploadStatus::Completed);

        let entries = store.entries(id).unwrap();
        assert_eq!(entries.len(), 500);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.row_index, i);
            assert_eq!(e.payload.get("a"), Some(&crate::types::CellValue::Integer(i as i64)));
        }
    }

    #[test]
    fn expired_deadline_fails_and_discards_rows() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestionPipeline::new(
            store.clone(),
            PipelineOptions {
                max_duration: Duration::ZERO,
                ..Default::default()
            },
        );
        let id = pending_upload(&store);
        let report = pipeline
            .ingest_sheets(id, vec![sheet("S", vec![ints(1, 2)])])
            .unwrap();
        assert_eq!(report.status, UploadStatus::Failed);
        assert!(report.error_summary.unwrap().contains("timed out"));
        assert!(store.entries(id).unwrap().is_empty());
    }

    #[test]
    fn panicking_source_fails_the_upload() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestionPipeline::new(store.clone(), PipelineOptions::default());
        let id = pending_upload(&store);

        let sheets = (0..2).map(|i| {
            if i == 1 {
                panic!("corrupt shared strings table");
            }
            sheet("S", vec![ints(1, 2)])
        });
        let report = pipeline.ingest_sheets(id, sheets).unwrap();
        assert_eq!(report.status, UploadStatus::Failed);
        assert!(
            report
                .error_summary
                .unwrap()
                .contains("corrupt shared strings table")
        );
        assert!(store.entries(id).unwrap().is_empty());
    }

    #[test]
    fn store_failure_on_commit_closes_the_upload() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestionPipeline::new(store.clone(), PipelineOptions::default());
        let id = pending_upload(&store);

        // Two sheets with the same name collide on (sheet, row_index).
        let err = pipeline
            .ingest_sheets(id, vec![sheet("S", vec![ints(1, 2)]), sheet("S", vec![ints(3, 4)])])
            .unwrap_err();
        assert!(
            matches!(&err, IngestionError::ConstraintViolation { sheet, row_index: 0, .. } if sheet == "S"),
            "{err:?}"
        );

        let upload = store.get_upload(id).unwrap();
        assert_eq!(upload.status, UploadStatus::Failed);
        assert!(
            upload
                .error_summary
                .unwrap()
                .starts_with("failed to persist entries")
        );
        assert!(store.entries(id).unwrap().is_empty());
    }

    #[test]
    fn blank_rows_are_skipped_not_errors() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestionPipeline::new(store.clone(), PipelineOptions::default());
        let id = pending_upload(&store);
        let rows = vec![ints(1, 2), vec![RawCell::Empty, RawCell::Empty], ints(3, 4)];
        let report = pipeline.ingest_sheets(id, vec![sheet("S", rows)]).unwrap();

        assert_eq!(report.status, UploadStatus::Completed);
        assert_eq!(report.skipped_rows(), 1);
        let entries = store.entries(id).unwrap();
        assert_eq!(entries[1].outcome, ParseOutcome::Skipped);
        assert_eq!(entries[1].error_detail.as_deref(), Some("blank row"));
        assert_eq!(entries[2].row_index, 2);
    }
}
