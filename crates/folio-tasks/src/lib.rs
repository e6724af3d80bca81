//! folio-tasks: background OCR jobs and folder-tree page normalization
//!
//! This crate runs OCR jobs against documents kept in a folder hierarchy,
//! committing each OCR pass as a new immutable document version, and walks
//! folder trees to normalize every page reachable from an origin node.
//! Storage, the OCR engine and page normalization are reached through traits
//! so that backends can be swapped.

pub mod config;
pub mod error;
pub mod processing;
pub mod providers;
pub mod storage;
pub mod types;

pub use config::FolioConfig;
pub use error::{Error, Result};
pub use processing::{
    JobOutcome, JobQueue, JobWorker, NormalizeReport, OcrJobExecutor, TreeNormalizer,
    VersionManager,
};
pub use providers::{DocumentRepository, OcrEngine, PageNormalizer};
pub use types::{
    document::{Document, DocumentVersion, Folder, Page},
    ids::{DocumentId, FolderId, PageId, UserId},
    node::{Node, NodeKind},
};
