//! Ingestion configuration.
//!
//! [`IngestionConfig`] is passed explicitly to [`crate::validation::ValidationGate`] and
//! [`crate::ingestion::IngestionPipeline`]; nothing reads ambient state. It can be built in code,
//! parsed from JSON, or read from `SHEET_INGEST_*` environment variables.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, IngestionResult};

/// Default upload size limit: 16 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;

/// Default ceiling on one ingestion run.
pub const DEFAULT_MAX_INGESTION_SECS: u64 = 300;

const ENV_ALLOWED_EXTENSIONS: &str = "SHEET_INGEST_ALLOWED_EXTENSIONS";
const ENV_MAX_UPLOAD_BYTES: &str = "SHEET_INGEST_MAX_UPLOAD_BYTES";
const ENV_MAX_INGESTION_SECS: &str = "SHEET_INGEST_MAX_INGESTION_SECS";
const ENV_PARALLEL_ROWS: &str = "SHEET_INGEST_PARALLEL_ROWS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Accepted file extensions, lowercase with a leading dot (e.g. `.xlsx`).
    pub allowed_extensions: BTreeSet<String>,
    /// Largest accepted upload in bytes.
    pub max_upload_bytes: u64,
    /// Maximum wall-clock duration of one ingestion run.
    pub max_ingestion_secs: u64,
    /// Normalize the rows of a sheet in parallel on the rayon pool.
    pub parallel_rows: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: [".xls", ".xlsx"].into_iter().map(String::from).collect(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_ingestion_secs: DEFAULT_MAX_INGESTION_SECS,
            parallel_rows: false,
        }
    }
}

impl IngestionConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(s: &str) -> IngestionResult<Self> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| IngestionError::Config {
            message: e.to_string(),
        })?;
        cfg.normalized()
    }

    /// Read overrides from `SHEET_INGEST_*` environment variables.
    pub fn from_env() -> IngestionResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from a key lookup (environment-style keys).
    pub fn from_lookup<F>(lookup: F) -> IngestionResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(ENV_ALLOWED_EXTENSIONS) {
            cfg.allowed_extensions = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(raw) = lookup(ENV_MAX_UPLOAD_BYTES) {
            cfg.max_upload_bytes = parse_env_number(ENV_MAX_UPLOAD_BYTES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_INGESTION_SECS) {
            cfg.max_ingestion_secs = parse_env_number(ENV_MAX_INGESTION_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_PARALLEL_ROWS) {
            cfg.parallel_rows = parse_env_bool(ENV_PARALLEL_ROWS, &raw)?;
        }

        cfg.normalized()
    }

    /// Lowercase extensions, add missing leading dots, and reject unusable limits.
    pub fn normalized(mut self) -> IngestionResult<Self> {
        self.allowed_extensions = self
            .allowed_extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| e.len() > 1)
            .collect();

        if self.allowed_extensions.is_empty() {
            return Err(IngestionError::Config {
                message: "allowed_extensions must not be empty".to_string(),
            });
        }
        if self.max_upload_bytes == 0 {
            return Err(IngestionError::Config {
                message: "max_upload_bytes must be > 0".to_string(),
            });
        }
        if self.max_ingestion_secs == 0 {
            return Err(IngestionError::Config {
                message: "max_ingestion_secs must be > 0".to_string(),
            });
        }
        Ok(self)
    }

    pub fn max_ingestion_duration(&self) -> Duration {
        Duration::from_secs(self.max_ingestion_secs)
    }
}

pub(crate) fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

fn parse_env_number(key: &str, raw: &str) -> IngestionResult<u64> {
    raw.trim().parse::<u64>().map_err(|e| IngestionError::Config {
        message: format!("{key}='{raw}': {e}"),
    })
}

fn parse_env_bool(key: &str, raw: &str) -> IngestionResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(IngestionError::Config {
            message: format!("{key}='{raw}': expected a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_upload_form_limits() {
        let cfg = IngestionConfig::default();
        assert_eq!(cfg.max_upload_bytes, 16_777_216);
        assert!(cfg.allowed_extensions.contains(".xlsx"));
        assert!(cfg.allowed_extensions.contains(".xls"));
        assert!(!cfg.parallel_rows);
    }

    #[test]
    fn json_fills_missing_fields_and_normalizes_extensions() {
        let cfg = IngestionConfig::from_json_str(r#"{"allowed_extensions": ["XLSX", ".Ods"]}"#).unwrap();
        assert_eq!(
            cfg.allowed_extensions.iter().cloned().collect::<Vec<_>>(),
            vec![".ods".to_string(), ".xlsx".to_string()]
        );
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn lookup_overrides_and_rejects_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SHEET_INGEST_MAX_UPLOAD_BYTES", "1024"),
            ("SHEET_INGEST_PARALLEL_ROWS", "yes"),
        ]);
        let cfg = IngestionConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.max_upload_bytes, 1024);
        assert!(cfg.parallel_rows);

        let err = IngestionConfig::from_lookup(|k| {
            (k == "SHEET_INGEST_MAX_UPLOAD_BYTES").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, IngestionError::Config { .. }));
    }

    #[test]
    fn zero_limit_is_a_config_error() {
        let err = IngestionConfig::from_json_str(r#"{"max_upload_bytes": 0}"#).unwrap_err();
        assert!(err.to_string().contains("max_upload_bytes"));
    }
}
