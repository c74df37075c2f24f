use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataEntry, NewDataEntry, NewUpload, Upload, UploadId, UploadStatus, UserId};

use super::IngestionStore;

#[derive(Default)]
struct MemoryState {
    uploads: HashMap<UploadId, Upload>,
    entries: HashMap<UploadId, Vec<DataEntry>>,
}

/// Mutex-guarded in-memory [`IngestionStore`].
///
/// Every operation holds the lock for its whole duration, which makes each call one transaction.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all uploads.
    pub fn entry_count(&self) -> IngestionResult<usize> {
        Ok(self.lock()?.entries.values().map(Vec::len).sum())
    }

    fn lock(&self) -> IngestionResult<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| IngestionError::StorePoisoned)
    }
}

impl IngestionStore for MemoryStore {
    fn save_upload(&self, upload: NewUpload) -> IngestionResult<UploadId> {
        let id = UploadId::new();
        let record = Upload {
            id,
            owner: upload.owner,
            original_filename: upload.original_filename,
            content_handle: upload.content_handle,
            byte_size: upload.byte_size,
            uploaded_at: Utc::now(),
            status: UploadStatus::Pending,
            error_summary: None,
            finished_at: None,
        };
        let mut state = self.lock()?;
        state.uploads.insert(id, record);
        state.entries.insert(id, Vec::new());
        Ok(id)
    }

    fn get_upload(&self, id: UploadId) -> IngestionResult<Upload> {
        self.lock()?
            .uploads
            .get(&id)
            .cloned()
            .ok_or(IngestionError::NotFound { upload_id: id })
    }

    fn transition(
        &self,
        id: UploadId,
        expected: UploadStatus,
        next: UploadStatus,
        error_summary: Option<String>,
    ) -> IngestionResult<Upload> {
        if !expected.can_transition_to(next) {
            return Err(IngestionError::InvalidTransition {
                from: expected,
                to: next,
            });
        }

        let mut state = self.lock()?;
        let upload = state
            .uploads
            .get_mut(&id)
            .ok_or(IngestionError::NotFound { upload_id: id })?;
        if upload.status != expected {
            return Err(IngestionError::StatusConflict {
                upload_id: id,
                expected,
                actual: upload.status,
            });
        }

        upload.status = next;
        upload.error_summary = if next.requires_error_summary() {
            Some(error_summary.unwrap_or_else(|| format!("upload {next}")))
        } else {
            None
        };
        if next.is_terminal() {
            upload.finished_at = Some(Utc::now());
        }
        Ok(upload.clone())
    }

    fn save_entries(&self, id: UploadId, entries: Vec<NewDataEntry>) -> IngestionResult<usize> {
        let mut state = self.lock()?;
        let status = state
            .uploads
            .get(&id)
            .map(|u| u.status)
            .ok_or(IngestionError::NotFound { upload_id: id })?;
        if status != UploadStatus::Processing {
            return Err(IngestionError::UploadClosed {
                upload_id: id,
                status,
            });
        }

        let existing = state.entries.entry(id).or_default();

        // Validate the whole batch before touching anything.
        let mut seen: HashSet<(&str, usize)> = existing
            .iter()
            .map(|e| (e.sheet_name.as_str(), e.row_index))
            .collect();
        for e in &entries {
            if !seen.insert((e.sheet_name.as_str(), e.row_index)) {
                return Err(IngestionError::ConstraintViolation {
                    upload_id: id,
                    sheet: e.sheet_name.clone(),
                    row_index: e.row_index,
                });
            }
        }
        drop(seen);

        let count = entries.len();
        existing.extend(entries.into_iter().map(|e| DataEntry::from_new(id, e)));
        Ok(count)
    }

    fn entries(&self, id: UploadId) -> IngestionResult<Vec<DataEntry>> {
        let state = self.lock()?;
        if !state.uploads.contains_key(&id) {
            return Err(IngestionError::NotFound { upload_id: id });
        }
        Ok(state.entries.get(&id).cloned().unwrap_or_default())
    }

    fn delete_upload(&self, id: UploadId) -> IngestionResult<usize> {
        let mut state = self.lock()?;
        if !state.uploads.contains_key(&id) {
            return Err(IngestionError::NotFound { upload_id: id });
        }
        // Children first, then the parent, under the same guard.
        let removed = state.entries.remove(&id).map(|v| v.len()).unwrap_or(0);
        state.uploads.remove(&id);
        Ok(removed)
    }

    fn uploads_for_user(&self, owner: &UserId) -> IngestionResult<Vec<Upload>> {
        let state = self.lock()?;
        let mut out: Vec<Upload> = state
            .uploads
            .values()
            .filter(|u| &u.owner == owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(out)
    }
}
