//! Provider abstractions for storage, OCR and page normalization
//!
//! The job pipeline only talks to these traits, so storage backends and OCR
//! engines can be swapped without touching the executor or the tree walker.

pub mod normalizer;
pub mod ocr;
pub mod repository;

pub use normalizer::{PageNormalizer, SearchTextNormalizer};
pub use ocr::{CommandOcrEngine, OcrEngine, OcrInput, PageText};
pub use repository::DocumentRepository;
