//! Pre-flight checks run before any bytes are persisted or parsed.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{IngestionConfig, normalize_extension};

/// Why an upload was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// The extension is not in the allow-list (`None` when the name has no extension).
    UnsupportedExtension { extension: Option<String> },
    TooLarge { size: u64, max: u64 },
    Empty,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedExtension { extension: Some(ext) } => {
                write!(f, "unsupported file extension '{ext}'")
            }
            Self::UnsupportedExtension { extension: None } => f.write_str("file has no extension"),
            Self::TooLarge { size, max } => write!(f, "file is {size} bytes, maximum is {max}"),
            Self::Empty => f.write_str("file is empty"),
        }
    }
}

/// Outcome of [`ValidationGate::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Rejection),
}

impl Verdict {
    /// Convert into a `Result`, for callers that propagate with `?`.
    pub fn into_result(self) -> Result<(), Rejection> {
        match self {
            Self::Accept => Ok(()),
            Self::Reject(r) => Err(r),
        }
    }
}

/// Deterministic, side-effect-free upload admission check.
#[derive(Debug, Clone)]
pub struct ValidationGate {
    allowed_extensions: BTreeSet<String>,
    max_bytes: u64,
}

impl ValidationGate {
    pub fn new(config: &IngestionConfig) -> Self {
        Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
            max_bytes: config.max_upload_bytes,
        }
    }

    /// Check a candidate file name and byte length.
    ///
    /// Checks run in order: extension, emptiness, size.
    pub fn check(&self, filename: &str, byte_len: u64) -> Verdict {
        let extension = extension_of(filename);
        let allowed = extension
            .as_deref()
            .is_some_and(|ext| self.allowed_extensions.contains(ext));
        if !allowed {
            return Verdict::Reject(Rejection::UnsupportedExtension { extension });
        }
        if byte_len == 0 {
            return Verdict::Reject(Rejection::Empty);
        }
        if byte_len > self.max_bytes {
            return Verdict::Reject(Rejection::TooLarge {
                size: byte_len,
                max: self.max_bytes,
            });
        }
        Verdict::Accept
    }
}

/// Lowercased extension of a file name, with its leading dot.
///
/// Uses the text after the last `.`, so `.xlsx` alone counts as extension `.xlsx`.
pub fn extension_of(filename: &str) -> Option<String> {
    let base = basename(filename);
    let (_, ext) = base.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// Reduce a user-supplied file name to a safe basename.
///
/// Path components are dropped, whitespace becomes `_`, and anything outside ASCII
/// alphanumerics, `.`, `-` and `_` is removed. Leading dots are stripped so the result is never
/// hidden or relative. Returns `"upload"` if nothing usable remains.
pub fn sanitize_filename(filename: &str) -> String {
    let base = basename(filename);
    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        if c.is_whitespace() {
            out.push('_');
        } else if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            out.push(c);
        }
    }
    let trimmed = out.trim_start_matches(['.', '_']).trim_end_matches('_');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Timestamp-prefixed storage name, e.g. `20240115_093000_report.xlsx`.
pub fn stored_name(filename: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", at.format("%Y%m%d_%H%M%S"), sanitize_filename(filename))
}

fn basename(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}
