//! Page normalization over a folder tree
//!
//! Starting from a document or folder, every page of every reachable
//! document is passed through the page normalizer. The walk is depth-first
//! pre-order and fully synchronous.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::Span;

use crate::error::{Error, Result};
use crate::providers::{DocumentRepository, PageNormalizer};
use crate::types::{DocumentId, FolderId, Node};

/// Counts from one traversal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub folders: usize,
    pub documents: usize,
    pub pages: usize,
    /// Nodes deleted between listing and visiting
    pub missing: usize,
}

/// Walks a folder tree and normalizes every page below an origin node
pub struct TreeNormalizer {
    repository: Arc<dyn DocumentRepository>,
    normalizer: Arc<dyn PageNormalizer>,
    span: Span,
}

impl TreeNormalizer {
    pub fn new(repository: Arc<dyn DocumentRepository>, normalizer: Arc<dyn PageNormalizer>) -> Self {
        Self {
            repository,
            normalizer,
            span: tracing::info_span!("tree_normalizer"),
        }
    }

    /// Parent span for everything this normalizer logs
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Whether re-running a traversal leaves pages as a single run would
    pub fn is_idempotent(&self) -> bool {
        self.normalizer.is_idempotent()
    }

    /// Normalize all pages reachable from `origin`.
    ///
    /// A node of unrecognized kind aborts the walk with `Error::DataIntegrity`.
    /// Pages already normalized before the abort keep their new state.
    /// A missing origin is an error; children deleted mid-walk are only counted.
    pub fn normalize(&self, origin: &Node) -> Result<NormalizeReport> {
        let span = tracing::info_span!(parent: &self.span, "normalize", origin = %origin);
        let _entered = span.enter();

        let mut report = NormalizeReport::default();
        let mut visited: HashSet<FolderId> = HashSet::new();
        let mut stack = vec![origin.clone()];
        let mut at_origin = true;

        while let Some(node) = stack.pop() {
            let is_origin = std::mem::replace(&mut at_origin, false);
            match node {
                Node::Document(id) => self.normalize_document(id, is_origin, &mut report)?,
                Node::Folder(id) => {
                    if !visited.insert(id) {
                        return Err(Error::data_integrity(format!(
                            "folder {} reached twice while normalizing from {}",
                            id, origin
                        )));
                    }
                    let children = match self.repository.get_descendants(id) {
                        Ok(children) => children,
                        Err(Error::FolderNotFound(_)) if !is_origin => {
                            tracing::warn!("Folder {} vanished before normalization", id);
                            report.missing += 1;
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    report.folders += 1;
                    // Reversed so the first child is popped first
                    stack.extend(children.into_iter().rev());
                }
                Node::Unrecognized { id, kind } => {
                    tracing::error!("Unexpected node kind '{}' for node {}", kind, id);
                    return Err(Error::data_integrity(format!(
                        "unexpected node kind '{}' for node {}",
                        kind, id
                    )));
                }
            }
        }

        tracing::info!(
            "Normalized {} pages in {} documents across {} folders",
            report.pages,
            report.documents,
            report.folders
        );
        Ok(report)
    }

    fn normalize_document(&self, id: DocumentId, is_origin: bool, report: &mut NormalizeReport) -> Result<()> {
        tracing::debug!("Normalizing document {}", id);

        let pages = match self.repository.get_pages(id) {
            Ok(pages) => pages,
            Err(Error::DocumentNotFound(_)) if !is_origin => {
                tracing::warn!("Document {} vanished before normalization", id);
                report.missing += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for mut page in pages {
            match self.normalizer.normalize(&mut page) {
                Ok(()) => {}
                Err(e @ Error::DataIntegrity(_)) => return Err(e),
                Err(e) => {
                    return Err(Error::normalization(format!(
                        "{} failed on page {} of document {}: {}",
                        self.normalizer.name(),
                        page.number,
                        id,
                        e
                    )))
                }
            }
            self.repository.update_page(id, &page)?;
            report.pages += 1;
        }
        report.documents += 1;
        Ok(())
    }
}
