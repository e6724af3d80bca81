//! Creation of new document versions from OCR output
//!
//! Version creation for one document is serialized twice over: jobs in this
//! process queue behind a per-document lock, and the repository append is a
//! compare-and-swap on the current version number so a writer in another
//! process cannot commit the same number.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};
use crate::providers::{DocumentRepository, PageText};
use crate::types::{Document, DocumentId, DocumentVersion, NewVersion, Page};

type LockRegistry = DashMap<DocumentId, Arc<Mutex<()>>>;

/// Exclusive right to create versions of one document in this process.
///
/// Dropping the lease releases the document and removes its registry entry
/// when no other job is waiting on it.
pub struct DocumentLease {
    document_id: DocumentId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockRegistry>,
}

impl DocumentLease {
    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }
}

impl Drop for DocumentLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.document_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Appends OCR results to a document's version history
pub struct VersionManager {
    repository: Arc<dyn DocumentRepository>,
    locks: Arc<LockRegistry>,
}

impl VersionManager {
    pub fn new(repository: Arc<dyn DocumentRepository>) -> Self {
        Self {
            repository,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Wait until no other job in this process holds the document, then hold it
    pub async fn lock(&self, document_id: DocumentId) -> DocumentLease {
        let mutex = self
            .locks
            .entry(document_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        DocumentLease {
            document_id,
            guard: Some(mutex.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    /// Number of documents with a live lock entry
    pub fn tracked_documents(&self) -> usize {
        self.locks.len()
    }

    /// Commit `pages` as version `source_version_number + 1` of `document`.
    ///
    /// Fails with `Error::VersionConflict` if the stored current version is no
    /// longer `source_version_number`.
    pub fn create_version(
        &self,
        document: &Document,
        lang: &str,
        source_version_number: u32,
        pages: Vec<PageText>,
    ) -> Result<DocumentVersion> {
        let source = document
            .versions
            .iter()
            .find(|v| v.number == source_version_number)
            .ok_or_else(|| {
                Error::data_integrity(format!(
                    "document {} has no version {}",
                    document.id, source_version_number
                ))
            })?;

        let mut pages = pages;
        pages.sort_by_key(|p| p.index);
        let pages = pages
            .into_iter()
            .map(|p| {
                let number = u32::try_from(p.index)
                    .ok()
                    .and_then(|index| index.checked_add(1))
                    .ok_or_else(|| {
                        Error::data_integrity(format!("page index {} out of range", p.index))
                    })?;
                Ok(Page::new(number, p.text))
            })
            .collect::<Result<Vec<Page>>>()?;

        let new_version = NewVersion {
            number: source_version_number + 1,
            file_name: source.file_name.clone(),
            lang: lang.to_string(),
            size: source.size,
            pages,
        };

        let version =
            self.repository
                .append_version(document.id, source_version_number, new_version)?;

        tracing::info!(
            "Created version {} of document {} ({} pages, lang {})",
            version.number,
            document.id,
            version.pages.len(),
            lang
        );

        Ok(version)
    }
}
