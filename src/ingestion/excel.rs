//! Workbook reader (`.xlsx`, `.xls`, `.xlsb`, `.ods`) built on `calamine`.
//!
//! Behavior:
//! - The container format is detected from the bytes, not the file name
//! - Sheets are yielded lazily in workbook order; each sheet range is loaded on demand
//! - The first non-empty row of a sheet is its header row; rows above it are dropped
//! - Header names are cleaned (see [`clean_header`])

use std::io::{Cursor, Read};

use calamine::{Data, Reader, Sheets, open_workbook_auto_from_rs};

use crate::error::{IngestionError, IngestionResult};
use crate::types::{RawCell, RawSheet};

/// An opened workbook, ready to yield its sheets.
pub struct WorkbookReader {
    workbook: Sheets<Cursor<Vec<u8>>>,
    sheet_names: Vec<String>,
}

impl WorkbookReader {
    /// Read the whole stream once and open it as a workbook.
    ///
    /// Fails with [`IngestionError::UnreadableFormat`] when the bytes are not a supported
    /// spreadsheet container.
    pub fn open(mut source: impl Read) -> IngestionResult<Self> {
        let mut buf = Vec::new();
        source.read_to_end(&mut buf)?;
        Self::from_bytes(buf)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> IngestionResult<Self> {
        let workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
        let sheet_names = workbook.sheet_names().to_vec();
        Ok(Self {
            workbook,
            sheet_names,
        })
    }

    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    /// Consume the reader into a single-pass iterator over its sheets.
    pub fn into_sheets(self) -> SheetIter {
        SheetIter {
            workbook: self.workbook,
            names: self.sheet_names.into_iter(),
        }
    }
}

/// Lazy iterator over the sheets of a [`WorkbookReader`].
pub struct SheetIter {
    workbook: Sheets<Cursor<Vec<u8>>>,
    names: std::vec::IntoIter<String>,
}

impl Iterator for SheetIter {
    type Item = IngestionResult<RawSheet>;

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.names.next()?;
        let sheet = self
            .workbook
            .worksheet_range(&name)
            .map_err(|e| IngestionError::SheetRead {
                sheet: name.clone(),
                message: e.to_string(),
            })
            .map(|range| sheet_from_range(name, &range));
        Some(sheet)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.names.size_hint()
    }
}

fn sheet_from_range(name: String, range: &calamine::Range<Data>) -> RawSheet {
    let mut rows = range.rows();
    let mut header_cells: Option<Vec<RawCell>> = None;
    for row in rows.by_ref() {
        if row.iter().any(|c| !matches!(c, Data::Empty)) {
            header_cells = Some(row.iter().map(convert_cell).collect());
            break;
        }
    }

    let Some(header_cells) = header_cells else {
        return RawSheet::new(name, Vec::new(), Vec::new());
    };

    let header = clean_header(&header_cells);
    let data_rows = rows.map(|row| row.iter().map(convert_cell).collect()).collect();
    RawSheet::new(name, header, data_rows)
}

/// Turn header cells into unique, non-blank column names.
///
/// Blank, `nan` and `None` headers become `Column_<n>` (1-based position). Repeated names get a
/// `_<k>` suffix, with `k` counting from 2.
pub fn clean_header(cells: &[RawCell]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        let text = header_text(cell);
        let base = match text.trim() {
            "" | "nan" | "None" => fallback_column_name(i),
            t => t.to_string(),
        };
        push_unique_name(&mut out, base);
    }
    out
}

/// Append `base`, suffixed `_<k>` (from 2) until it does not collide with a name already taken.
pub(crate) fn push_unique_name(names: &mut Vec<String>, base: String) {
    let mut name = base.clone();
    let mut k = 2;
    while names.contains(&name) {
        name = format!("{base}_{k}");
        k += 1;
    }
    names.push(name);
}

/// Name used for a column without a usable header.
pub fn fallback_column_name(idx0: usize) -> String {
    format!("Column_{}", idx0 + 1)
}

fn header_text(c: &RawCell) -> String {
    match c {
        RawCell::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => (*f as i64).to_string(),
        RawCell::Unsupported(_) => String::new(),
        other => other.raw_text(),
    }
}

/// Map a calamine cell onto the reader-neutral [`RawCell`].
pub(crate) fn convert_cell(c: &Data) -> RawCell {
    match c {
        Data::Empty => RawCell::Empty,
        Data::Int(i) => RawCell::Int(*i),
        Data::Float(f) => RawCell::Float(*f),
        Data::Bool(b) => RawCell::Bool(*b),
        Data::String(s) => RawCell::Text(s.clone()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ndt) => RawCell::DateTime(ndt),
            None => RawCell::DateSerial(dt.as_f64()),
        },
        Data::DateTimeIso(s) => RawCell::DateTimeIso(s.clone()),
        Data::DurationIso(s) => RawCell::DurationIso(s.clone()),
        Data::Error(e) => RawCell::ErrorValue(e.to_string()),
    }
}
