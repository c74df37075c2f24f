//! Read-side views over stored uploads and entries.
//!
//! These back the dashboard and the chart/analysis collaborators: upload statistics, the list of
//! failing rows for an upload, and a per-column numeric/text profile of the payloads.

use serde::Serialize;

use crate::error::IngestionResult;
use crate::store::IngestionStore;
use crate::types::{CellValue, DataEntry, ParseOutcome, Upload, UploadId, UploadStatus, UserId};

/// Aggregate statistics over a user's uploads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadDashboard {
    pub total_uploads: usize,
    /// Uploads that reached `completed` or `completed_with_errors`.
    pub successful_uploads: usize,
    pub total_bytes: u64,
}

impl UploadDashboard {
    pub fn from_uploads(uploads: &[Upload]) -> Self {
        Self {
            total_uploads: uploads.len(),
            successful_uploads: uploads
                .iter()
                .filter(|u| {
                    matches!(
                        u.status,
                        UploadStatus::Completed | UploadStatus::CompletedWithErrors
                    )
                })
                .count(),
            total_bytes: uploads.iter().map(|u| u.byte_size).sum(),
        }
    }

    pub fn for_user(store: &dyn IngestionStore, owner: &UserId) -> IngestionResult<Self> {
        Ok(Self::from_uploads(&store.uploads_for_user(owner)?))
    }
}

/// Human-readable size with 1024-based units, e.g. `1.50 KB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// One failing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub sheet: String,
    pub row_index: usize,
    pub detail: String,
}

/// Status, summary and failing rows of one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub upload_id: UploadId,
    pub status: UploadStatus,
    pub error_summary: Option<String>,
    pub rows: Vec<RowError>,
}

impl FailureReport {
    pub fn load(store: &dyn IngestionStore, upload_id: UploadId) -> IngestionResult<Self> {
        let upload = store.get_upload(upload_id)?;
        let rows = store
            .failed_entries(upload_id)?
            .into_iter()
            .map(|e| RowError {
                sheet: e.sheet_name,
                row_index: e.row_index,
                detail: e.error_detail.unwrap_or_default(),
            })
            .collect();
        Ok(Self {
            upload_id,
            status: upload.status,
            error_summary: upload.error_summary,
            rows,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.error_summary.is_none() && self.rows.is_empty()
    }
}

/// How a column should be treated by chart builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    /// No non-null values in the sample.
    Empty,
}

/// Per-column value counts over a sample of entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub numeric: usize,
    pub text: usize,
    pub null: usize,
    /// Up to five example values.
    pub samples: Vec<String>,
}

impl ColumnProfile {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            numeric: 0,
            text: 0,
            null: 0,
            samples: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.numeric + self.text + self.null
    }

    pub fn kind(&self) -> ColumnKind {
        if self.numeric == 0 && self.text == 0 {
            ColumnKind::Empty
        } else if self.numeric > self.text {
            ColumnKind::Numeric
        } else {
            ColumnKind::Categorical
        }
    }
}

const MAX_SAMPLES: usize = 5;

/// Profile the payload columns of the first `sample` `ok` entries.
///
/// Columns are returned in first-seen order. Text that reads as a number (including thousands
/// separators) counts as numeric.
pub fn profile_columns(entries: &[DataEntry], sample: usize) -> Vec<ColumnProfile> {
    let mut profiles: Vec<ColumnProfile> = Vec::new();
    for entry in entries
        .iter()
        .filter(|e| e.outcome == ParseOutcome::Ok)
        .take(sample)
    {
        for (column, value) in entry.payload.iter() {
            let idx = match profiles.iter().position(|p| p.name == column) {
                Some(i) => i,
                None => {
                    profiles.push(ColumnProfile::new(column));
                    profiles.len() - 1
                }
            };
            let profile = &mut profiles[idx];
            match value {
                CellValue::Null => profile.null += 1,
                v if v.is_numeric() || looks_numeric(v) => profile.numeric += 1,
                _ => profile.text += 1,
            }
            if !value.is_null() && profile.samples.len() < MAX_SAMPLES {
                profile.samples.push(value.to_string());
            }
        }
    }
    profiles
}

fn looks_numeric(v: &CellValue) -> bool {
    match v {
        CellValue::Text(s) => s.replace(',', "").trim().parse::<f64>().is_ok_and(f64::is_finite),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryId, Payload};

    fn entry(row: usize, fields: Vec<(&str, CellValue)>) -> DataEntry {
        let mut payload = Payload::new();
        for (k, v) in fields {
            payload.push(k, v);
        }
        DataEntry {
            id: EntryId::new(),
            upload_id: UploadId::new(),
            sheet_name: "S".to_string(),
            row_index: row,
            payload,
            outcome: ParseOutcome::Ok,
            error_detail: None,
        }
    }

    #[test]
    fn file_sizes() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(1023), "1023 B");
        assert_eq!(format_file_size(1536), "1.50 KB");
        assert_eq!(format_file_size(16 * 1024 * 1024), "16.00 MB");
        assert_eq!(format_file_size(5 * 1024 * 1024 * 1024 * 1024), "5120.00 GB");
    }

    #[test]
    fn profiles_numeric_and_categorical_columns() {
        let entries = vec![
            entry(0, vec![("region", CellValue::Text("North".into())), ("sales", CellValue::Integer(10))]),
            entry(1, vec![("region", CellValue::Text("South".into())), ("sales", CellValue::Text("1,200".into()))]),
            entry(2, vec![("region", CellValue::Null), ("sales", CellValue::Number(3.5))]),
        ];
        let profiles = profile_columns(&entries, 20);
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].name, "region");
        assert_eq!(profiles[0].kind(), ColumnKind::Categorical);
        assert_eq!(profiles[0].null, 1);
        assert_eq!(profiles[1].kind(), ColumnKind::Numeric);
        assert_eq!(profiles[1].numeric, 3);
        assert_eq!(profiles[1].samples, vec!["10", "1,200", "3.5"]);
    }

    #[test]
    fn sample_limit_and_error_rows_are_respected() {
        let mut bad = entry(1, vec![("x", CellValue::Text("oops".into()))]);
        bad.outcome = ParseOutcome::Error;
        let entries = vec![
            entry(0, vec![("x", CellValue::Integer(1))]),
            bad,
            entry(2, vec![("x", CellValue::Integer(2))]),
            entry(3, vec![("x", CellValue::Integer(3))]),
        ];
        let profiles = profile_columns(&entries, 2);
        assert_eq!(profiles[0].numeric, 2);
        assert_eq!(profiles[0].text, 0);
    }
}
