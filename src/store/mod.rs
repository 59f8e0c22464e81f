//! Document store: records keyed by id, revision-checked writes, attachments and a live
//! change feed ordered by a monotonic update sequence.

mod sqlite;

pub use sqlite::SqliteStore;

use anyhow::Result;
use crossbeam_channel::Receiver;

use crate::types::{Attachment, MediaRecord};
use crate::utils::config::DEAD_MEDIA_PAGE_SIZE;

/// One committed mutation, as delivered to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    pub seq: u64,
    pub id: String,
    pub deleted: bool,
    /// Document body after the change; `None` for deletions.
    pub doc: Option<MediaRecord>,
}

pub trait DocumentStore: Send + Sync {
    /// `Ok(None)` when no document has this id.
    fn get(&self, id: &str) -> Result<Option<MediaRecord>>;

    /// Write `record` (and optionally replace one attachment). `record.rev` must equal the
    /// stored revision (`None` for a new document), else [`crate::errors::StoreError::Conflict`],
    /// or [`crate::errors::StoreError::NotFound`] when a revised document was deleted.
    /// Returns the record carrying its new revision.
    fn put(&self, record: &MediaRecord, attachment: Option<&Attachment>) -> Result<MediaRecord>;

    /// Delete regardless of revision. Returns whether a document was removed.
    fn remove(&self, id: &str) -> Result<bool>;

    /// Delete many `(id, rev)` pairs in one transaction; stale revisions are skipped.
    /// Returns the number deleted.
    fn bulk_delete(&self, docs: &[(String, Option<String>)]) -> Result<usize>;

    /// Up to `limit` documents with id greater than `start_after`, ordered by id.
    fn list_page(&self, start_after: Option<&str>, limit: usize) -> Result<Vec<MediaRecord>>;

    fn attachment(&self, id: &str, name: &str) -> Result<Option<Attachment>>;

    /// Sequence number of the last committed change (0 for an empty store).
    fn update_seq(&self) -> Result<u64>;

    /// Live changes committed after this call.
    fn subscribe(&self) -> Receiver<Change>;

    /// Every document, paged internally.
    fn list_all(&self) -> Result<Vec<MediaRecord>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list_page(cursor.as_deref(), DEAD_MEDIA_PAGE_SIZE)?;
            let done = page.len() < DEAD_MEDIA_PAGE_SIZE;
            cursor = page.last().map(|r| r.id.clone());
            out.extend(page);
            if done {
                return Ok(out);
            }
        }
    }
}
