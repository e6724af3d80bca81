//! In-memory document repository

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::providers::repository::{current_of, DocumentRepository};
use crate::types::document::aggregate_text;
use crate::types::{
    Document, DocumentId, DocumentVersion, Folder, FolderId, NewVersion, Node, Page,
};

#[derive(Default)]
struct State {
    documents: HashMap<DocumentId, Document>,
    folders: HashMap<FolderId, Folder>,
    /// Direct children per folder, in insertion order
    children: HashMap<FolderId, Vec<Node>>,
}

/// Repository kept entirely in process memory
#[derive(Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a folder, registering it under its parent
    pub fn insert_folder(&self, folder: Folder) {
        let mut state = self.state.write();
        if let Some(parent) = folder.parent_id {
            state.children.entry(parent).or_default().push(Node::Folder(folder.id));
        }
        state.children.entry(folder.id).or_default();
        state.folders.insert(folder.id, folder);
    }

    /// Add a document, registering it under its parent folder
    pub fn insert_document(&self, document: Document) {
        let mut state = self.state.write();
        if let Some(parent) = document.parent_id {
            state.children.entry(parent).or_default().push(Node::Document(document.id));
        }
        state.documents.insert(document.id, document);
    }

    /// Attach an arbitrary node to a folder, bypassing kind checks
    pub fn insert_child(&self, folder: FolderId, node: Node) {
        self.state.write().children.entry(folder).or_default().push(node);
    }

    /// Delete a document and unlink it from its parent
    pub fn remove_document(&self, id: DocumentId) -> Option<Document> {
        let mut state = self.state.write();
        let removed = state.documents.remove(&id)?;
        if let Some(parent) = removed.parent_id {
            if let Some(children) = state.children.get_mut(&parent) {
                children.retain(|n| n != &Node::Document(id));
            }
        }
        Some(removed)
    }

    pub fn document_count(&self) -> usize {
        self.state.read().documents.len()
    }
}

impl DocumentRepository for InMemoryRepository {
    fn get_document(&self, id: DocumentId) -> Result<Document> {
        self.state
            .read()
            .documents
            .get(&id)
            .cloned()
            .ok_or(Error::DocumentNotFound(id))
    }

    fn get_current_version(&self, document: &Document) -> Result<DocumentVersion> {
        let stored = self.get_document(document.id)?;
        current_of(&stored)
    }

    fn get_pages(&self, id: DocumentId) -> Result<Vec<Page>> {
        let document = self.get_document(id)?;
        let mut pages = current_of(&document)?.pages;
        pages.sort_by_key(|p| p.number);
        Ok(pages)
    }

    fn get_descendants(&self, folder: FolderId) -> Result<Vec<Node>> {
        let state = self.state.read();
        if !state.folders.contains_key(&folder) {
            return Err(Error::FolderNotFound(folder));
        }
        Ok(state.children.get(&folder).cloned().unwrap_or_default())
    }

    fn append_version(
        &self,
        id: DocumentId,
        expected_current: u32,
        version: NewVersion,
    ) -> Result<DocumentVersion> {
        let mut state = self.state.write();
        let document = state.documents.get_mut(&id).ok_or(Error::DocumentNotFound(id))?;

        let found = document.current_version_number().unwrap_or(0);
        if found != expected_current {
            return Err(Error::VersionConflict {
                document_id: id,
                expected: expected_current,
                found,
            });
        }
        if version.number != expected_current + 1 {
            return Err(Error::data_integrity(format!(
                "version {} cannot follow version {} of document {}",
                version.number, expected_current, id
            )));
        }

        let version = version.into_version();
        document.versions.push(version.clone());
        Ok(version)
    }

    fn update_page(&self, id: DocumentId, page: &Page) -> Result<()> {
        let mut state = self.state.write();
        let document = state.documents.get_mut(&id).ok_or(Error::DocumentNotFound(id))?;
        let current = document
            .versions
            .last_mut()
            .ok_or_else(|| Error::data_integrity(format!("document {} has no versions", id)))?;

        let stored = current
            .pages
            .iter_mut()
            .find(|p| p.id == page.id)
            .ok_or_else(|| {
                Error::data_integrity(format!(
                    "page {} is not part of the current version of document {}",
                    page.id, id
                ))
            })?;
        *stored = page.clone();
        Ok(())
    }

    fn update_search_text(&self, id: DocumentId) -> Result<String> {
        let mut state = self.state.write();
        let document = state.documents.get_mut(&id).ok_or(Error::DocumentNotFound(id))?;
        let current = document
            .versions
            .last_mut()
            .ok_or_else(|| Error::data_integrity(format!("document {} has no versions", id)))?;

        let text = aggregate_text(&current.pages);
        current.text = Some(text.clone());
        document.search_text = Some(text.clone());
        Ok(text)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    fn new_version(number: u32) -> NewVersion {
        NewVersion {
            number,
            file_name: "scan.pdf".to_string(),
            lang: "en".to_string(),
            size: 0,
            pages: vec![Page::new(1, "text")],
        }
    }

    #[test]
    fn test_append_version_compare_and_swap() {
        let repo = InMemoryRepository::new();
        let doc = Document::new(UserId::new(), "Scan", "scan.pdf");
        let id = doc.id;
        repo.insert_document(doc);

        let v2 = repo.append_version(id, 1, new_version(2)).unwrap();
        assert_eq!(v2.number, 2);

        // Stale writer still believes version 1 is current
        let err = repo.append_version(id, 1, new_version(2)).unwrap_err();
        assert!(matches!(err, Error::VersionConflict { expected: 1, found: 2, .. }));

        let stored = repo.get_document(id).unwrap();
        assert_eq!(stored.versions.len(), 2);
        assert!(stored.versions_are_sequential());
    }

    #[test]
    fn test_append_rejects_skipped_number() {
        let repo = InMemoryRepository::new();
        let doc = Document::new(UserId::new(), "Scan", "scan.pdf");
        let id = doc.id;
        repo.insert_document(doc);

        let err = repo.append_version(id, 1, new_version(5)).unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));
    }

    #[test]
    fn test_descendants_are_direct_children_only() {
        let repo = InMemoryRepository::new();
        let user = UserId::new();
        let root = Folder::new(user, "root");
        let nested = Folder::new(user, "nested").with_parent(root.id);
        let doc = Document::new(user, "deep", "deep.pdf").with_parent(nested.id);
        let (root_id, nested_id, doc_id) = (root.id, nested.id, doc.id);

        repo.insert_folder(root);
        repo.insert_folder(nested);
        repo.insert_document(doc);

        assert_eq!(repo.get_descendants(root_id).unwrap(), vec![Node::Folder(nested_id)]);
        assert_eq!(repo.get_descendants(nested_id).unwrap(), vec![Node::Document(doc_id)]);
        assert!(matches!(
            repo.get_descendants(FolderId::new()),
            Err(Error::FolderNotFound(_))
        ));
    }

    #[test]
    fn test_remove_document_unlinks_from_parent() {
        let repo = InMemoryRepository::new();
        let folder = Folder::new(UserId::new(), "inbox");
        let doc = Document::new(folder.user_id, "scan", "scan.pdf").with_parent(folder.id);
        let (folder_id, doc_id) = (folder.id, doc.id);
        repo.insert_folder(folder);
        repo.insert_document(doc);

        assert!(repo.remove_document(doc_id).is_some());
        assert!(repo.get_descendants(folder_id).unwrap().is_empty());
        assert!(repo.get_document(doc_id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_search_text_sets_document_and_version() {
        let repo = InMemoryRepository::new();
        let doc = Document::new(UserId::new(), "Scan", "scan.pdf")
            .with_pages(vec![Page::new(2, "world"), Page::new(1, "hello")]);
        let id = doc.id;
        repo.insert_document(doc);

        assert_eq!(repo.update_search_text(id).unwrap(), "hello world");
        let stored = repo.get_document(id).unwrap();
        assert_eq!(stored.search_text.as_deref(), Some("hello world"));
        assert_eq!(stored.current_version().unwrap().text.as_deref(), Some("hello world"));
    }
}
