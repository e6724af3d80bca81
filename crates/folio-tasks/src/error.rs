//! Error types for OCR jobs and tree normalization

use thiserror::Error;

use crate::types::ids::{DocumentId, FolderId};

/// Result type alias for folio-tasks operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the job pipeline and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Document does not exist (or was deleted while a job was running)
    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// Folder does not exist
    #[error("Folder not found: {0}")]
    FolderNotFound(FolderId),

    /// Storage returned data that violates the tree or version invariants
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    /// Another writer committed a version first
    #[error("Version conflict on document {document_id}: expected current version {expected}, found {found}")]
    VersionConflict {
        document_id: DocumentId,
        expected: u32,
        found: u32,
    },

    /// OCR engine failure
    #[error("OCR error: {0}")]
    Ocr(String),

    /// Page normalization failure
    #[error("Normalization error: {0}")]
    Normalization(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML config parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Job queue error
    #[error("Queue error: {0}")]
    Queue(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a data integrity error
    pub fn data_integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity(message.into())
    }

    /// Create an OCR error
    pub fn ocr(message: impl Into<String>) -> Self {
        Self::Ocr(message.into())
    }

    /// Create a normalization error
    pub fn normalization(message: impl Into<String>) -> Self {
        Self::Normalization(message.into())
    }

    /// Create a queue error
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Whether the error means the addressed entity no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DocumentNotFound(_) | Self::FolderNotFound(_))
    }

    /// Whether a job failing with this error may be delivered again.
    ///
    /// Integrity violations and missing entities are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DocumentNotFound(_)
            | Self::FolderNotFound(_)
            | Self::DataIntegrity(_)
            | Self::Config(_)
            | Self::Toml(_) => false,
            Self::VersionConflict { .. }
            | Self::Ocr(_)
            | Self::Normalization(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Queue(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let gone = Error::DocumentNotFound(DocumentId::new());
        assert!(gone.is_not_found());
        assert!(!gone.is_retryable());

        assert!(!Error::data_integrity("bad kind").is_retryable());
        assert!(Error::ocr("engine crashed").is_retryable());

        let conflict = Error::VersionConflict {
            document_id: DocumentId::new(),
            expected: 2,
            found: 3,
        };
        assert!(conflict.is_retryable());
        assert!(conflict.to_string().contains("expected current version 2, found 3"));
    }
}
