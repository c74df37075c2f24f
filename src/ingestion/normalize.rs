//! Row normalization: raw cells + header -> ordered, typed [`Payload`].
//!
//! Coercion is best-effort per cell:
//!
//! - numeric cells, and text that reads as a number, become numbers
//! - date cells, and text that reads as an ISO-style date, become ISO-8601 strings
//! - everything else stays text
//!
//! A cell whose typed coercion fails degrades to its raw text. Only content with no usable
//! representation (embedded objects, unterminated formula text) fails the row with
//! [`IngestionError::CellCoercion`].

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{IngestionError, IngestionResult};
use crate::types::{CellValue, Payload, RawCell};

use super::excel::{fallback_column_name, push_unique_name};

/// Result of normalizing one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Row(Payload),
    /// Every cell in the row is blank.
    Skipped,
}

/// Normalize a raw row against its sheet header.
///
/// Cells past the end of the header are keyed `Column_<n>`; header columns missing from a short
/// row are filled with [`CellValue::Null`].
pub fn normalize_row(header: &[String], row: &[RawCell]) -> IngestionResult<Normalized> {
    if row.iter().all(RawCell::is_blank) {
        return Ok(Normalized::Skipped);
    }

    let columns = column_keys(header, row.len());
    let mut payload = Payload::with_capacity(columns.len());
    for (idx, column) in columns.into_iter().enumerate() {
        let value = match row.get(idx) {
            Some(cell) => normalize_cell(&column, cell)?,
            None => CellValue::Null,
        };
        payload.push(column, value);
    }
    Ok(Normalized::Row(payload))
}

/// Payload keys for a row `row_len` cells wide.
///
/// The header names come first; every further cell is keyed `Column_<n>`. All keys go through the
/// same `_<k>` suffixing as header cleaning, so they stay unique even when the header already
/// uses a `Column_<n>` name.
pub fn column_keys(header: &[String], row_len: usize) -> Vec<String> {
    let width = header.len().max(row_len);
    let mut keys = Vec::with_capacity(width);
    for idx in 0..width {
        let base = match header.get(idx) {
            Some(name) => name.clone(),
            None => fallback_column_name(idx),
        };
        push_unique_name(&mut keys, base);
    }
    keys
}

/// Render a row as raw text, keyed like [`normalize_row`] would key it.
///
/// Used for rows that failed normalization so the stored entry still shows what was there.
pub fn raw_payload(header: &[String], row: &[RawCell]) -> Payload {
    let columns = column_keys(header, row.len());
    let mut payload = Payload::with_capacity(columns.len());
    for (idx, column) in columns.into_iter().enumerate() {
        let value = match row.get(idx) {
            Some(cell) if !cell.is_blank() => CellValue::Text(cell.raw_text()),
            _ => CellValue::Null,
        };
        payload.push(column, value);
    }
    payload
}

/// Normalize a single cell.
pub fn normalize_cell(column: &str, cell: &RawCell) -> IngestionResult<CellValue> {
    let value = match cell {
        RawCell::Empty => CellValue::Null,
        RawCell::Int(i) => CellValue::Integer(*i),
        RawCell::Float(f) => float_value(*f),
        RawCell::Bool(b) => CellValue::Bool(*b),
        RawCell::DateTime(dt) => CellValue::Date(iso_datetime(dt)),
        RawCell::DateSerial(serial) => CellValue::Text(serial.to_string()),
        RawCell::DateTimeIso(s) => CellValue::Date(s.clone()),
        RawCell::DurationIso(s) => CellValue::Text(s.clone()),
        RawCell::ErrorValue(code) => CellValue::Text(code.clone()),
        RawCell::Text(s) => text_value(column, s)?,
        RawCell::Unsupported(desc) => {
            return Err(IngestionError::CellCoercion {
                column: column.to_string(),
                raw: cell.raw_text(),
                message: format!("unsupported cell content ({desc})"),
            });
        }
    };
    Ok(value)
}

fn float_value(f: f64) -> CellValue {
    if !f.is_finite() {
        return CellValue::Text(f.to_string());
    }
    // Whole floats within the exact-integer range of f64 read back as integers.
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        CellValue::Integer(f as i64)
    } else {
        CellValue::Number(f)
    }
}

fn text_value(column: &str, raw: &str) -> IngestionResult<CellValue> {
    let s = raw.trim();
    if s.is_empty() {
        return Ok(CellValue::Null);
    }
    if s.starts_with('=') && !is_balanced_formula(s) {
        return Err(IngestionError::CellCoercion {
            column: column.to_string(),
            raw: raw.to_string(),
            message: "unterminated formula".to_string(),
        });
    }
    if let Some(n) = parse_number(s) {
        return Ok(n);
    }
    if let Some(d) = parse_date(s) {
        return Ok(CellValue::Date(d));
    }
    Ok(CellValue::Text(s.to_string()))
}

/// Parentheses balance and string literals close.
fn is_balanced_formula(s: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    for c in s.chars() {
        match c {
            '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0 && !in_string
}

fn parse_number(s: &str) -> Option<CellValue> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(CellValue::Integer(i));
    }
    // Rust's float parser accepts "inf"/"nan"; those stay text.
    if !s.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    let cleaned = strip_thousands_separators(s)?;
    if let Ok(i) = cleaned.parse::<i64>() {
        return Some(CellValue::Integer(i));
    }
    match cleaned.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(CellValue::Number(f)),
        _ => None,
    }
}

/// Accept `1,234,567.89` but not `1,2` or `12,34,5`.
fn strip_thousands_separators(s: &str) -> Option<String> {
    if !s.contains(',') {
        return Some(s.to_string());
    }
    let (int_part, frac) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    let digits = int_part.trim_start_matches(['-', '+']);
    let mut groups = digits.split(',');
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 {
        return None;
    }
    if !groups.all(|g| g.len() == 3 && g.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    let mut out = int_part.replace(',', "");
    if let Some(f) = frac {
        out.push('.');
        out.push_str(f);
    }
    Some(out)
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn parse_date(s: &str) -> Option<String> {
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(iso_datetime(&dt));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.format("%Y-%m-%d").to_string());
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.to_rfc3339());
    }
    None
}

/// Midnight renders as a bare date.
fn iso_datetime(dt: &NaiveDateTime) -> String {
    if dt.time() == NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn text(s: &str) -> RawCell {
        RawCell::Text(s.to_string())
    }

    #[test]
    fn coerces_numbers_dates_and_text() {
        let h = header(&["id", "amount", "when", "name", "flag"]);
        let row = vec![
            RawCell::Float(7.0),
            text("1,234.50"),
            text("2024-03-01"),
            text("  Ada "),
            RawCell::Bool(true),
        ];
        let Normalized::Row(p) = normalize_row(&h, &row).unwrap() else {
            panic!("expected a row");
        };
        assert_eq!(p.get("id"), Some(&CellValue::Integer(7)));
        assert_eq!(p.get("amount"), Some(&CellValue::Number(1234.5)));
        assert_eq!(p.get("when"), Some(&CellValue::Date("2024-03-01".to_string())));
        assert_eq!(p.get("name"), Some(&CellValue::Text("Ada".to_string())));
        assert_eq!(p.get("flag"), Some(&CellValue::Bool(true)));
    }

    #[test]
    fn date_cells_become_iso_strings() {
        let dt = NaiveDate::from_ymd_opt(2023, 12, 31)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap();
        assert_eq!(
            normalize_cell("c", &RawCell::DateTime(dt)).unwrap(),
            CellValue::Date("2023-12-31T14:05:00".to_string())
        );
        let midnight = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap().and_time(NaiveTime::MIN);
        assert_eq!(
            normalize_cell("c", &RawCell::DateTime(midnight)).unwrap(),
            CellValue::Date("2023-12-31".to_string())
        );
    }

    #[test]
    fn blank_row_is_skipped() {
        let h = header(&["a", "b", "c"]);
        let row = vec![RawCell::Empty, text("   "), RawCell::Empty];
        assert_eq!(normalize_row(&h, &row).unwrap(), Normalized::Skipped);
        assert_eq!(normalize_row(&h, &[]).unwrap(), Normalized::Skipped);
    }

    #[test]
    fn short_and_wide_rows_are_keyed_consistently() {
        let h = header(&["a", "b"]);
        let Normalized::Row(short) = normalize_row(&h, &[RawCell::Int(1)]).unwrap() else {
            panic!("expected a row");
        };
        assert_eq!(short.get("b"), Some(&CellValue::Null));

        let Normalized::Row(wide) =
            normalize_row(&h, &[RawCell::Int(1), RawCell::Int(2), text("x")]).unwrap()
        else {
            panic!("expected a row");
        };
        assert_eq!(wide.columns().collect::<Vec<_>>(), vec!["a", "b", "Column_3"]);
    }

    #[test]
    fn overflow_cells_never_reuse_a_header_name() {
        let h = header(&["Column_3", "b"]);
        let row = [RawCell::Int(1), RawCell::Int(2), RawCell::Int(3)];
        let Normalized::Row(p) = normalize_row(&h, &row).unwrap() else {
            panic!("expected a row");
        };
        assert_eq!(p.to_json_string().unwrap(), r#"{"Column_3":1,"b":2,"Column_3_2":3}"#);

        let raw = raw_payload(&h, &row);
        assert_eq!(raw.columns().collect::<Vec<_>>(), vec!["Column_3", "b", "Column_3_2"]);
        assert_eq!(raw.get("Column_3_2"), Some(&CellValue::Text("3".to_string())));
    }

    #[test]
    fn degraded_cells_keep_raw_text() {
        assert_eq!(
            normalize_cell("c", &RawCell::ErrorValue("#N/A".to_string())).unwrap(),
            CellValue::Text("#N/A".to_string())
        );
        assert_eq!(
            normalize_cell("c", &RawCell::Float(f64::NAN)).unwrap(),
            CellValue::Text("NaN".to_string())
        );
        assert_eq!(normalize_cell("c", &text("1,2")).unwrap(), CellValue::Text("1,2".to_string()));
        assert_eq!(normalize_cell("c", &text("inf")).unwrap(), CellValue::Text("inf".to_string()));
        assert_eq!(
            normalize_cell("c", &text("2024-02-30")).unwrap(),
            CellValue::Text("2024-02-30".to_string())
        );
    }

    #[test]
    fn unterminated_formula_fails_the_row() {
        let h = header(&["total"]);
        let err = normalize_row(&h, &[text("=SUM(A1:A3")]).unwrap_err();
        match err {
            IngestionError::CellCoercion { column, message, .. } => {
                assert_eq!(column, "total");
                assert_eq!(message, "unterminated formula");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            normalize_cell("c", &text("=CONCAT(\"a)\", B1)")).unwrap(),
            CellValue::Text("=CONCAT(\"a)\", B1)".to_string())
        );
    }

    #[test]
    fn unsupported_content_fails_the_row() {
        let err = normalize_cell("logo", &RawCell::Unsupported("embedded image".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("embedded image"));
    }

    #[test]
    fn raw_payload_renders_text() {
        let h = header(&["a", "b"]);
        let p = raw_payload(&h, &[RawCell::Int(3), RawCell::Unsupported("ole".to_string())]);
        assert_eq!(p.get("a"), Some(&CellValue::Text("3".to_string())));
        assert_eq!(p.get("b"), Some(&CellValue::Text("<ole>".to_string())));
    }
}
