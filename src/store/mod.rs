//! Persistence of [`Upload`] and [`DataEntry`] records.
//!
//! [`IngestionStore`] is the seam between the pipeline and whatever datastore backs it.
//! [`MemoryStore`] is the in-process implementation used by tests and embedders.

mod memory;

pub use memory::MemoryStore;

use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataEntry, NewDataEntry, NewUpload, ParseOutcome, Upload, UploadId, UploadStatus, UserId};

/// Storage contract for uploads and their entries.
///
/// Implementations must uphold:
///
/// - `save_entries` is all-or-nothing
/// - `(upload, sheet_name, row_index)` is unique
/// - status changes are compare-and-set and follow [`UploadStatus::can_transition_to`]
/// - entries are only written while the upload is `processing`
/// - deleting an upload deletes its entries first, in the same transaction
pub trait IngestionStore: Send + Sync {
    /// Create an upload in status `pending`.
    fn save_upload(&self, upload: NewUpload) -> IngestionResult<UploadId>;

    fn get_upload(&self, id: UploadId) -> IngestionResult<Upload>;

    /// Atomically move `id` from `expected` to `next`.
    ///
    /// Fails with [`IngestionError::StatusConflict`] when the current status is not `expected`,
    /// and with [`IngestionError::InvalidTransition`] when `expected -> next` is not an edge of the
    /// state machine. `error_summary` is stored only for statuses that carry one.
    fn transition(
        &self,
        id: UploadId,
        expected: UploadStatus,
        next: UploadStatus,
        error_summary: Option<String>,
    ) -> IngestionResult<Upload>;

    /// Commit every entry or none. Returns the number of entries written.
    fn save_entries(&self, id: UploadId, entries: Vec<NewDataEntry>) -> IngestionResult<usize>;

    /// Entries of an upload, grouped by sheet in ingestion order, rows ascending.
    fn entries(&self, id: UploadId) -> IngestionResult<Vec<DataEntry>>;

    /// Delete an upload and all its entries. Returns the number of entries removed.
    fn delete_upload(&self, id: UploadId) -> IngestionResult<usize>;

    /// Uploads owned by `owner`, newest first.
    fn uploads_for_user(&self, owner: &UserId) -> IngestionResult<Vec<Upload>>;

    /// Like [`Self::get_upload`], but uploads owned by someone else are reported as not found.
    fn get_upload_for_user(&self, owner: &UserId, id: UploadId) -> IngestionResult<Upload> {
        let upload = self.get_upload(id)?;
        if &upload.owner != owner {
            return Err(IngestionError::NotFound { upload_id: id });
        }
        Ok(upload)
    }

    /// Entries whose outcome is [`ParseOutcome::Error`].
    fn failed_entries(&self, id: UploadId) -> IngestionResult<Vec<DataEntry>> {
        Ok(self
            .entries(id)?
            .into_iter()
            .filter(|e| e.outcome == ParseOutcome::Error)
            .collect())
    }

    /// Delete every upload of `owner`, cascading to entries. Returns the number of uploads removed.
    fn delete_uploads_for_user(&self, owner: &UserId) -> IngestionResult<usize> {
        let uploads = self.uploads_for_user(owner)?;
        for upload in &uploads {
            self.delete_upload(upload.id)?;
        }
        Ok(uploads.len())
    }
}
