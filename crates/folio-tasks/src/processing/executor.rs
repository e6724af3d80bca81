//! OCR job executor
//!
//! Runs one OCR job end to end: read the current version, extract text,
//! commit it as the next version and refresh the document's search text.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{Instrument, Span};

use crate::config::FolioConfig;
use crate::error::{Error, Result};
use crate::providers::{DocumentRepository, OcrEngine, OcrInput};
use crate::types::{Document, DocumentId, OcrRequest};

use super::version_manager::VersionManager;

/// How an OCR job ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Exactly one new version was committed
    Succeeded {
        document_id: DocumentId,
        version: u32,
        pages: usize,
    },
    /// The document was deleted before the job could commit
    DocumentGone { document_id: DocumentId },
    /// Text extraction failed or timed out; nothing was committed
    EngineFailed {
        document_id: DocumentId,
        reason: String,
    },
    /// Another writer committed a version first; nothing was committed
    VersionConflict {
        document_id: DocumentId,
        expected: u32,
        found: u32,
    },
}

impl JobOutcome {
    pub fn document_id(&self) -> DocumentId {
        match self {
            Self::Succeeded { document_id, .. }
            | Self::DocumentGone { document_id }
            | Self::EngineFailed { document_id, .. }
            | Self::VersionConflict { document_id, .. } => *document_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Whether delivering the job again can succeed.
    ///
    /// A deleted document never comes back, so `DocumentGone` is terminal.
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::EngineFailed { .. } | Self::VersionConflict { .. })
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { document_id, version, pages } => {
                write!(f, "document {} OCRed into version {} ({} pages)", document_id, version, pages)
            }
            Self::DocumentGone { document_id } => {
                write!(f, "document {} no longer exists", document_id)
            }
            Self::EngineFailed { document_id, reason } => {
                write!(f, "OCR of document {} failed: {}", document_id, reason)
            }
            Self::VersionConflict { document_id, expected, found } => write!(
                f,
                "document {} moved from version {} to {} during OCR",
                document_id, expected, found
            ),
        }
    }
}

/// Orchestrates OCR jobs against a repository and an OCR engine
pub struct OcrJobExecutor {
    repository: Arc<dyn DocumentRepository>,
    engine: Arc<dyn OcrEngine>,
    versions: Arc<VersionManager>,
    media_root: PathBuf,
    ocr_timeout: Duration,
    span: Span,
}

impl OcrJobExecutor {
    pub fn new(
        repository: Arc<dyn DocumentRepository>,
        engine: Arc<dyn OcrEngine>,
        versions: Arc<VersionManager>,
        media_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repository,
            engine,
            versions,
            media_root: media_root.into(),
            ocr_timeout: Duration::from_secs(600),
            span: tracing::info_span!("ocr_executor"),
        }
    }

    /// Build an executor with storage and timeout settings from config
    pub fn from_config(
        config: &FolioConfig,
        repository: Arc<dyn DocumentRepository>,
        engine: Arc<dyn OcrEngine>,
        versions: Arc<VersionManager>,
    ) -> Self {
        Self::new(repository, engine, versions, config.storage.media_root.clone())
            .with_ocr_timeout(Duration::from_secs(config.ocr.timeout_secs))
    }

    pub fn with_ocr_timeout(mut self, ocr_timeout: Duration) -> Self {
        self.ocr_timeout = ocr_timeout;
        self
    }

    /// Parent span for everything this executor logs
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Run one OCR job.
    ///
    /// Expected conditions (deleted document, engine failure, lost version
    /// race) come back as a `JobOutcome`; storage failures are `Err`.
    pub async fn run(&self, request: &OcrRequest) -> Result<JobOutcome> {
        let span = tracing::info_span!(
            parent: &self.span,
            "ocr_job",
            document_id = %request.document_id,
            lang = %request.lang,
        );
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: &OcrRequest) -> Result<JobOutcome> {
        let document_id = request.document_id;
        let gone = JobOutcome::DocumentGone { document_id };

        let _lease = self.versions.lock(document_id).await;

        let Some(document) = self.load(document_id)? else {
            tracing::error!("Document {} not found, dropping OCR job", document_id);
            return Ok(gone);
        };
        let source = match self.repository.get_current_version(&document) {
            Ok(version) => version,
            Err(Error::DocumentNotFound(_)) => {
                tracing::error!("Document {} not found, dropping OCR job", document_id);
                return Ok(gone);
            }
            Err(e) => return Err(e),
        };

        let file = document.file_ref(&source).path_under(&self.media_root);
        let input = OcrInput {
            file,
            file_name: source.file_name.clone(),
            lang: request.lang.clone(),
            namespace: request.namespace.clone(),
            version: source.number,
            target_version: source.number + 1,
        };

        tracing::info!(
            "OCR of '{}' (version {} -> {}) with {}",
            input.file_name,
            input.version,
            input.target_version,
            self.engine.name()
        );
        let started = std::time::Instant::now();

        let pages = match timeout(self.ocr_timeout, self.engine.extract(&input)).await {
            Ok(Ok(pages)) => pages,
            Ok(Err(e)) => {
                tracing::warn!("OCR engine failed for document {}: {}", document_id, e);
                return Ok(JobOutcome::EngineFailed {
                    document_id,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::error!(
                    "TIMEOUT: OCR of document {} took >{}s",
                    document_id,
                    self.ocr_timeout.as_secs()
                );
                return Ok(JobOutcome::EngineFailed {
                    document_id,
                    reason: format!("OCR timed out after {}s", self.ocr_timeout.as_secs()),
                });
            }
        };

        tracing::debug!(
            "Extracted {} pages in {:.1}s",
            pages.len(),
            started.elapsed().as_secs_f64()
        );

        // The document may have been deleted while the engine was running
        let Some(document) = self.load(document_id)? else {
            tracing::error!(
                "Document {} was deleted during OCR, version {} not created",
                document_id,
                input.target_version
            );
            return Ok(gone);
        };

        let version =
            match self
                .versions
                .create_version(&document, &request.lang, source.number, pages)
            {
                Ok(version) => version,
                Err(Error::VersionConflict { expected, found, .. }) => {
                    tracing::warn!(
                        "Document {} changed from version {} to {} during OCR",
                        document_id,
                        expected,
                        found
                    );
                    return Ok(JobOutcome::VersionConflict {
                        document_id,
                        expected,
                        found,
                    });
                }
                Err(Error::DocumentNotFound(_)) => {
                    tracing::error!("Document {} was deleted before commit", document_id);
                    return Ok(gone);
                }
                Err(e) => return Err(e),
            };

        match self.repository.update_search_text(document_id) {
            Ok(text) => tracing::debug!("Search text refreshed ({} chars)", text.len()),
            Err(Error::DocumentNotFound(_)) => {
                tracing::error!("Document {} was deleted before search text refresh", document_id);
                return Ok(gone);
            }
            Err(e) => return Err(e),
        }

        Ok(JobOutcome::Succeeded {
            document_id,
            version: version.number,
            pages: version.pages.len(),
        })
    }

    /// Load a document, mapping not-found to `None`
    fn load(&self, id: DocumentId) -> Result<Option<Document>> {
        match self.repository.get_document(id) {
            Ok(document) => Ok(Some(document)),
            Err(Error::DocumentNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::PageText;
    use crate::storage::InMemoryRepository;
    use crate::types::{Page, UserId};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine returning fixed pages and recording its inputs
    struct FixedEngine {
        pages: Vec<String>,
        delay: Duration,
        calls: AtomicUsize,
        inputs: Mutex<Vec<OcrInput>>,
        /// Document deleted from this repository while "extracting"
        delete_during: Option<(Arc<InMemoryRepository>, DocumentId)>,
    }

    impl FixedEngine {
        fn new(pages: &[&str]) -> Self {
            Self {
                pages: pages.iter().map(|p| p.to_string()).collect(),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                inputs: Mutex::new(Vec::new()),
                delete_during: None,
            }
        }
    }

    #[async_trait]
    impl OcrEngine for FixedEngine {
        async fn extract(&self, input: &OcrInput) -> Result<Vec<PageText>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().push(input.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some((repo, id)) = &self.delete_during {
                repo.remove_document(*id);
            }
            Ok(self
                .pages
                .iter()
                .enumerate()
                .map(|(index, text)| PageText { index, text: text.clone() })
                .collect())
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl OcrEngine for FailingEngine {
        async fn extract(&self, _input: &OcrInput) -> Result<Vec<PageText>> {
            Err(Error::ocr("tesseract crashed"))
        }

        async fn is_available(&self) -> bool {
            false
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn document_at_version_2(repo: &InMemoryRepository) -> Document {
        let doc = Document::new(UserId::new(), "D1", "scan.pdf")
            .with_pages(vec![Page::new(1, "old text")]);
        repo.insert_document(doc.clone());
        repo.append_version(
            doc.id,
            1,
            crate::types::NewVersion {
                number: 2,
                file_name: "scan.pdf".to_string(),
                lang: "en".to_string(),
                size: 1024,
                pages: vec![Page::new(1, "old text")],
            },
        )
        .unwrap();
        repo.get_document(doc.id).unwrap()
    }

    fn executor(repo: Arc<InMemoryRepository>, engine: Arc<dyn OcrEngine>) -> OcrJobExecutor {
        let versions = Arc::new(VersionManager::new(repo.clone()));
        OcrJobExecutor::new(repo, engine, versions, "/media")
    }

    #[tokio::test]
    async fn test_successful_job_creates_next_version() {
        let repo = Arc::new(InMemoryRepository::new());
        let doc = document_at_version_2(&repo);
        let engine = Arc::new(FixedEngine::new(&["Invoice 42", "Total: 10 EUR"]));
        let exec = executor(repo.clone(), engine.clone());

        let outcome = exec.run(&OcrRequest::new(doc.id, "en")).await.unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Succeeded { document_id: doc.id, version: 3, pages: 2 }
        );
        assert!(outcome.is_success());

        let stored = repo.get_document(doc.id).unwrap();
        assert_eq!(stored.versions.len(), 3);
        assert_eq!(stored.current_version_number(), Some(3));
        assert!(stored.versions_are_sequential());
        assert_eq!(stored.search_text.as_deref(), Some("Invoice 42 Total: 10 EUR"));

        let inputs = engine.inputs.lock();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].file_name, "scan.pdf");
        assert_eq!(inputs[0].version, 2);
        assert_eq!(inputs[0].target_version, 3);
        assert!(inputs[0].file.ends_with("v2/scan.pdf"));
    }

    #[tokio::test]
    async fn test_namespace_passed_through() {
        let repo = Arc::new(InMemoryRepository::new());
        let doc = document_at_version_2(&repo);
        let engine = Arc::new(FixedEngine::new(&["text"]));
        let exec = executor(repo, engine.clone());

        exec.run(&OcrRequest::new(doc.id, "deu").with_namespace("tenant-a"))
            .await
            .unwrap();

        let inputs = engine.inputs.lock();
        assert_eq!(inputs[0].namespace.as_deref(), Some("tenant-a"));
        assert_eq!(inputs[0].lang, "deu");
    }

    #[tokio::test]
    async fn test_missing_document_is_gone_without_engine_call() {
        let repo = Arc::new(InMemoryRepository::new());
        let engine = Arc::new(FixedEngine::new(&["text"]));
        let exec = executor(repo, engine.clone());

        let id = DocumentId::new();
        let outcome = exec.run(&OcrRequest::new(id, "en")).await.unwrap();

        assert_eq!(outcome, JobOutcome::DocumentGone { document_id: id });
        assert!(!outcome.should_retry());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_document_deleted_during_ocr() {
        let repo = Arc::new(InMemoryRepository::new());
        let doc = document_at_version_2(&repo);
        let mut engine = FixedEngine::new(&["text"]);
        engine.delete_during = Some((repo.clone(), doc.id));
        let exec = executor(repo.clone(), Arc::new(engine));

        let outcome = exec.run(&OcrRequest::new(doc.id, "en")).await.unwrap();

        assert_eq!(outcome, JobOutcome::DocumentGone { document_id: doc.id });
        assert!(!outcome.is_success());
        assert_eq!(repo.document_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_leaves_versions_unchanged() {
        let repo = Arc::new(InMemoryRepository::new());
        let doc = document_at_version_2(&repo);
        let exec = executor(repo.clone(), Arc::new(FailingEngine));

        let outcome = exec.run(&OcrRequest::new(doc.id, "en")).await.unwrap();

        assert!(matches!(outcome, JobOutcome::EngineFailed { .. }));
        assert!(outcome.should_retry());
        let stored = repo.get_document(doc.id).unwrap();
        assert_eq!(stored.versions.len(), 2);
        assert!(stored.search_text.is_none());
    }

    #[tokio::test]
    async fn test_lock_entries_released_on_every_outcome() {
        let repo = Arc::new(InMemoryRepository::new());
        let doc = document_at_version_2(&repo);
        let versions = Arc::new(VersionManager::new(repo.clone()));
        let failing = OcrJobExecutor::new(repo.clone(), Arc::new(FailingEngine), versions.clone(), "/media");
        let working = OcrJobExecutor::new(repo.clone(), Arc::new(FixedEngine::new(&["text"])), versions.clone(), "/media");

        for _ in 0..50 {
            failing.run(&OcrRequest::new(DocumentId::new(), "en")).await.unwrap();
        }
        assert_eq!(versions.tracked_documents(), 0);

        let outcome = failing.run(&OcrRequest::new(doc.id, "en")).await.unwrap();
        assert!(matches!(outcome, JobOutcome::EngineFailed { .. }));
        assert_eq!(versions.tracked_documents(), 0);

        assert!(working.run(&OcrRequest::new(doc.id, "en")).await.unwrap().is_success());
        assert_eq!(versions.tracked_documents(), 0);
    }

    #[tokio::test]
    async fn test_engine_timeout_is_engine_failure() {
        let repo = Arc::new(InMemoryRepository::new());
        let doc = document_at_version_2(&repo);
        let mut engine = FixedEngine::new(&["slow"]);
        engine.delay = Duration::from_millis(200);
        let exec = executor(repo.clone(), Arc::new(engine))
            .with_ocr_timeout(Duration::from_millis(20));

        let outcome = exec.run(&OcrRequest::new(doc.id, "en")).await.unwrap();

        match outcome {
            JobOutcome::EngineFailed { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(repo.get_document(doc.id).unwrap().versions.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_jobs_queue_behind_each_other() {
        let repo = Arc::new(InMemoryRepository::new());
        let doc = document_at_version_2(&repo);
        let mut engine = FixedEngine::new(&["page"]);
        engine.delay = Duration::from_millis(30);
        let exec = Arc::new(executor(repo.clone(), Arc::new(engine)));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let exec = exec.clone();
                let request = OcrRequest::new(doc.id, "en");
                tokio::spawn(async move { exec.run(&request).await.unwrap() })
            })
            .collect();

        let mut versions = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                JobOutcome::Succeeded { version, .. } => versions.push(version),
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        versions.sort_unstable();
        assert_eq!(versions, vec![3, 4]);

        let stored = repo.get_document(doc.id).unwrap();
        assert_eq!(stored.versions.len(), 4);
        assert!(stored.versions_are_sequential());
    }

    #[tokio::test]
    async fn test_writer_outside_process_causes_conflict() {
        let repo = Arc::new(InMemoryRepository::new());
        let doc = document_at_version_2(&repo);

        /// Commits a competing version while extraction runs, like a second worker process
        struct RacingEngine {
            repo: Arc<InMemoryRepository>,
            id: DocumentId,
        }

        #[async_trait]
        impl OcrEngine for RacingEngine {
            async fn extract(&self, _input: &OcrInput) -> Result<Vec<PageText>> {
                self.repo.append_version(
                    self.id,
                    2,
                    crate::types::NewVersion {
                        number: 3,
                        file_name: "scan.pdf".to_string(),
                        lang: "en".to_string(),
                        size: 0,
                        pages: vec![],
                    },
                )?;
                Ok(vec![PageText { index: 0, text: "late".to_string() }])
            }

            async fn is_available(&self) -> bool {
                true
            }

            fn name(&self) -> &str {
                "racing"
            }
        }

        let engine = Arc::new(RacingEngine { repo: repo.clone(), id: doc.id });
        let exec = executor(repo.clone(), engine);

        let outcome = exec.run(&OcrRequest::new(doc.id, "en")).await.unwrap();

        assert_eq!(
            outcome,
            JobOutcome::VersionConflict { document_id: doc.id, expected: 2, found: 3 }
        );
        let stored = repo.get_document(doc.id).unwrap();
        assert_eq!(stored.versions.len(), 3);
        assert!(stored.versions_are_sequential());
        assert!(stored.search_text.is_none());
    }
}
