//! Document repository trait consumed by the job pipeline

use crate::error::Result;
use crate::types::{Document, DocumentId, DocumentVersion, FolderId, NewVersion, Node, Page};

/// Trait for document, folder and page storage
///
/// Implementations:
/// - `InMemoryRepository`: process-local maps (tests, embedding)
/// - `SqliteRepository`: SQLite file
pub trait DocumentRepository: Send + Sync {
    /// Load a document with its versions.
    ///
    /// Returns `Error::DocumentNotFound` if it does not exist.
    fn get_document(&self, id: DocumentId) -> Result<Document>;

    /// Current (latest) version of a document
    fn get_current_version(&self, document: &Document) -> Result<DocumentVersion>;

    /// Pages of the document's current version, ordered by page number
    fn get_pages(&self, id: DocumentId) -> Result<Vec<Page>>;

    /// Direct descendants (one level) of a folder
    fn get_descendants(&self, folder: FolderId) -> Result<Vec<Node>>;

    /// Append a version if the stored current version is still `expected_current`.
    ///
    /// Fails with `Error::VersionConflict` otherwise, leaving storage untouched.
    fn append_version(
        &self,
        id: DocumentId,
        expected_current: u32,
        version: NewVersion,
    ) -> Result<DocumentVersion>;

    /// Persist text and normalization state of a page of the current version
    fn update_page(&self, id: DocumentId, page: &Page) -> Result<()>;

    /// Recompute the document's searchable text from its current pages
    fn update_search_text(&self, id: DocumentId) -> Result<String>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Shared helper: the current version of a loaded document or an integrity error
pub(crate) fn current_of(document: &Document) -> Result<DocumentVersion> {
    document.current_version().cloned().ok_or_else(|| {
        crate::error::Error::data_integrity(format!("document {} has no versions", document.id))
    })
}
