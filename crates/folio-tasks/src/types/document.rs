//! Documents, their immutable versions, pages and folders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::ids::{DocumentId, FolderId, PageId, UserId};

/// Number given to the first version of every document
pub const BASELINE_VERSION: u32 = 1;

/// A single page of extracted content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    /// 1-based page number within its version
    pub number: u32,
    /// Extracted text (empty until OCR populates it)
    pub text: String,
    /// Output of the page normalizer, if it has run
    pub normalized_text: Option<String>,
    pub normalized: bool,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            id: PageId::new(),
            number,
            text: text.into(),
            normalized_text: None,
            normalized: false,
        }
    }
}

/// An immutable snapshot of a document's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub number: u32,
    pub file_name: String,
    /// Language the pages were extracted with
    pub lang: String,
    pub size: u64,
    pub pages: Vec<Page>,
    /// Aggregated page text, set once OCR has completed
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data for a version about to be appended to a document
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub number: u32,
    pub file_name: String,
    pub lang: String,
    pub size: u64,
    pub pages: Vec<Page>,
}

impl NewVersion {
    pub fn into_version(self) -> DocumentVersion {
        DocumentVersion {
            number: self.number,
            file_name: self.file_name,
            lang: self.lang,
            size: self.size,
            pages: self.pages,
            text: None,
            created_at: Utc::now(),
        }
    }
}

/// A document with its append-only version history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub user_id: UserId,
    pub parent_id: Option<FolderId>,
    pub title: String,
    /// Ordered oldest first; the last entry is the current version
    pub versions: Vec<DocumentVersion>,
    /// Searchable text of the current version
    pub search_text: Option<String>,
}

impl Document {
    /// Create a document whose baseline version references `file_name` and has no pages yet
    pub fn new(user_id: UserId, title: impl Into<String>, file_name: impl Into<String>) -> Self {
        let baseline = DocumentVersion {
            number: BASELINE_VERSION,
            file_name: file_name.into(),
            lang: String::new(),
            size: 0,
            pages: Vec::new(),
            text: None,
            created_at: Utc::now(),
        };

        Self {
            id: DocumentId::new(),
            user_id,
            parent_id: None,
            title: title.into(),
            versions: vec![baseline],
            search_text: None,
        }
    }

    pub fn with_parent(mut self, parent: FolderId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Replace the pages of the current version
    pub fn with_pages(mut self, pages: Vec<Page>) -> Self {
        if let Some(current) = self.versions.last_mut() {
            current.pages = pages;
        }
        self
    }

    /// The current version is always the last one
    pub fn current_version(&self) -> Option<&DocumentVersion> {
        self.versions.last()
    }

    pub fn current_version_number(&self) -> Option<u32> {
        self.current_version().map(|v| v.number)
    }

    /// Check that version numbers increase by exactly one from the baseline
    pub fn versions_are_sequential(&self) -> bool {
        self.versions
            .iter()
            .enumerate()
            .all(|(i, v)| v.number == BASELINE_VERSION + i as u32)
    }

    /// File reference of a given version
    pub fn file_ref(&self, version: &DocumentVersion) -> FileRef {
        FileRef {
            user_id: self.user_id,
            document_id: self.id,
            version: version.number,
            file_name: version.file_name.clone(),
        }
    }
}

/// Join page texts into the searchable text of a version.
///
/// Pages are ordered by number, trimmed, and empty pages are skipped.
pub fn aggregate_text<'a, I>(pages: I) -> String
where
    I: IntoIterator<Item = &'a Page>,
{
    let mut ordered: Vec<&Page> = pages.into_iter().collect();
    ordered.sort_by_key(|p| p.number);

    ordered
        .iter()
        .map(|p| p.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Location of a version's file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub user_id: UserId,
    pub document_id: DocumentId,
    pub version: u32,
    pub file_name: String,
}

impl FileRef {
    /// `<root>/user_<user>/document_<doc>/v<n>/<file_name>`
    pub fn path_under(&self, media_root: &Path) -> PathBuf {
        media_root
            .join(format!("user_{}", self.user_id))
            .join(format!("document_{}", self.document_id))
            .join(format!("v{}", self.version))
            .join(&self.file_name)
    }
}

/// A folder node in the tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub user_id: UserId,
    /// `None` for the root folder
    pub parent_id: Option<FolderId>,
    pub title: String,
}

impl Folder {
    pub fn new(user_id: UserId, title: impl Into<String>) -> Self {
        Self {
            id: FolderId::new(),
            user_id,
            parent_id: None,
            title: title.into(),
        }
    }

    pub fn with_parent(mut self, parent: FolderId) -> Self {
        self.parent_id = Some(parent);
        self
    }
}
