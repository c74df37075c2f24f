//! Core data model for ingestion.
//!
//! An [`Upload`] tracks one submitted spreadsheet through the status state machine; each source
//! row becomes one [`DataEntry`] whose [`Payload`] is an ordered mapping of column name to a typed
//! [`CellValue`]. Readers hand sheets to the pipeline as [`RawSheet`]s of [`RawCell`]s.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Opaque identifier of an [`Upload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(pub Uuid);

impl UploadId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque identifier of a [`DataEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference to the user owning an upload. User management lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upload status state machine.
///
/// ```text
/// pending --> processing --> completed
///                       \--> completed_with_errors
///                        \-> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl UploadStatus {
    /// Terminal statuses accept no further writes.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Failed
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, CompletedWithErrors)
                | (Processing, Failed)
        )
    }

    /// Whether an upload in this status must carry an error summary.
    pub fn requires_error_summary(self) -> bool {
        matches!(self, Self::Failed | Self::CompletedWithErrors)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for a new upload, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUpload {
    pub owner: UserId,
    pub original_filename: String,
    /// Handle of the stored bytes (path or content address), opaque to this crate.
    pub content_handle: String,
    pub byte_size: u64,
}

/// One user-submitted spreadsheet tracked through ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Upload {
    pub id: UploadId,
    pub owner: UserId,
    pub original_filename: String,
    pub content_handle: String,
    pub byte_size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub status: UploadStatus,
    /// Set iff `status` is `failed` or `completed_with_errors`.
    pub error_summary: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Per-row parse classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseOutcome {
    Ok,
    Skipped,
    Error,
}

/// A normalized cell value.
///
/// Serialized as plain JSON (number, string, bool or null) so payloads read as ordinary
/// JSON records; the variant keeps the type information on the Rust side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Number(f64),
    Bool(bool),
    /// ISO-8601 date or date-time.
    Date(String),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Number(_))
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Date(s) | Self::Text(s) => f.write_str(s),
        }
    }
}

/// Ordered mapping of column name to [`CellValue`].
///
/// Serializes as a JSON object whose keys keep the source column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    fields: Vec<(String, CellValue)>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            fields: Vec::with_capacity(n),
        }
    }

    /// Append a column. Callers are responsible for key uniqueness.
    pub fn push(&mut self, column: impl Into<String>, value: CellValue) {
        self.fields.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.fields
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Render the payload as a JSON string.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// A DataEntry staged by the pipeline, before the store assigns ids.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDataEntry {
    pub sheet_name: String,
    pub row_index: usize,
    pub payload: Payload,
    pub outcome: ParseOutcome,
    pub error_detail: Option<String>,
}

impl NewDataEntry {
    pub fn ok(sheet_name: impl Into<String>, row_index: usize, payload: Payload) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            row_index,
            payload,
            outcome: ParseOutcome::Ok,
            error_detail: None,
        }
    }

    pub fn skipped(sheet_name: impl Into<String>, row_index: usize, reason: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            row_index,
            payload: Payload::new(),
            outcome: ParseOutcome::Skipped,
            error_detail: Some(reason.into()),
        }
    }

    pub fn error(
        sheet_name: impl Into<String>,
        row_index: usize,
        payload: Payload,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            row_index,
            payload,
            outcome: ParseOutcome::Error,
            error_detail: Some(detail.into()),
        }
    }
}

/// One normalized record derived from a single source row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataEntry {
    pub id: EntryId,
    pub upload_id: UploadId,
    pub sheet_name: String,
    /// 0-based, stable within a sheet, in source order.
    pub row_index: usize,
    pub payload: Payload,
    pub outcome: ParseOutcome,
    /// Set iff `outcome` is not [`ParseOutcome::Ok`].
    pub error_detail: Option<String>,
}

impl DataEntry {
    pub(crate) fn from_new(upload_id: UploadId, entry: NewDataEntry) -> Self {
        Self {
            id: EntryId::new(),
            upload_id,
            sheet_name: entry.sheet_name,
            row_index: entry.row_index,
            payload: entry.payload,
            outcome: entry.outcome,
            error_detail: entry.error_detail,
        }
    }
}

/// A cell as produced by a format reader, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Empty,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    /// A date cell the reader could resolve to a calendar date-time.
    DateTime(NaiveDateTime),
    /// A date cell the reader could not resolve; carries the raw serial number.
    DateSerial(f64),
    DateTimeIso(String),
    DurationIso(String),
    /// A spreadsheet error value such as `#DIV/0!`.
    ErrorValue(String),
    /// Content with no textual representation (embedded objects, binary references).
    Unsupported(String),
}

impl RawCell {
    /// Empty cells and whitespace-only text count as blank.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Raw text form, used when a cell degrades or a row fails.
    pub fn raw_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Text(s) | Self::DateTimeIso(s) | Self::DurationIso(s) | Self::ErrorValue(s) => {
                s.clone()
            }
            Self::DateTime(dt) => dt.to_string(),
            Self::DateSerial(f) => f.to_string(),
            Self::Unsupported(desc) => format!("<{desc}>"),
        }
    }
}

/// One sheet handed from a format reader to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub name: String,
    /// Canonical column names from the first non-empty row; empty for a blank sheet.
    pub header: Vec<String>,
    /// Data rows after the header, in source order.
    pub rows: Vec<Vec<RawCell>>,
}

impl RawSheet {
    pub fn new(name: impl Into<String>, header: Vec<String>, rows: Vec<Vec<RawCell>>) -> Self {
        Self {
            name: name.into(),
            header,
            rows,
        }
    }
}
