//! Core types for documents, folder trees and job requests

pub mod document;
pub mod ids;
pub mod node;
pub mod request;

pub use document::{Document, DocumentVersion, FileRef, Folder, NewVersion, Page, BASELINE_VERSION};
pub use ids::{DocumentId, FolderId, PageId, UserId};
pub use node::{Node, NodeKind};
pub use request::{NormalizeRequest, OcrRequest};
