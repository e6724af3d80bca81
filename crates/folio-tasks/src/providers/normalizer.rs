//! Page-local normalization

use crate::error::Result;
use crate::types::Page;

/// A transform applied in place to a single page.
///
/// Every implementation states whether applying it twice yields the same
/// page as applying it once; tree normalization may revisit pages when a
/// job is redelivered.
pub trait PageNormalizer: Send + Sync {
    fn normalize(&self, page: &mut Page) -> Result<()>;

    fn is_idempotent(&self) -> bool;

    fn name(&self) -> &str;
}

/// Derives the search-ready form of a page's text.
///
/// Lowercases, drops control characters and collapses whitespace runs into
/// single spaces. Idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchTextNormalizer;

impl SearchTextNormalizer {
    pub fn new() -> Self {
        Self
    }

    fn normalize_text(text: &str) -> String {
        text.split_whitespace()
            .map(|word| {
                word.chars()
                    .filter(|c| !c.is_control())
                    .flat_map(char::to_lowercase)
                    .collect::<String>()
            })
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl PageNormalizer for SearchTextNormalizer {
    fn normalize(&self, page: &mut Page) -> Result<()> {
        page.normalized_text = Some(Self::normalize_text(&page.text));
        page.normalized = true;
        Ok(())
    }

    fn is_idempotent(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "search-text"
    }
}
