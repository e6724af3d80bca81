//! OCR engine trait and the command-line engine implementation

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use crate::config::OcrConfig;
use crate::error::{Error, Result};

/// Everything an engine needs to extract one version's text
#[derive(Debug, Clone)]
pub struct OcrInput {
    /// Path of the source version's file
    pub file: PathBuf,
    pub file_name: String,
    pub lang: String,
    pub namespace: Option<String>,
    /// Version being read
    pub version: u32,
    /// Version the extracted text will be committed as
    pub target_version: u32,
}

/// Text extracted from one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 0-based page index in the source file
    pub index: usize,
    pub text: String,
}

/// Trait for OCR text extraction
///
/// Implementations:
/// - `CommandOcrEngine`: external OCR binary (tesseract by default)
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Extract text from every page of the input file
    async fn extract(&self, input: &OcrInput) -> Result<Vec<PageText>>;

    /// Check if the engine can be used
    async fn is_available(&self) -> bool;

    /// Get engine name for logging
    fn name(&self) -> &str;
}

/// Runs an external OCR command and reads pages from its stdout.
///
/// Argument placeholders `{file}` and `{lang}` are substituted per call.
/// Pages are separated by form feeds, as tesseract emits them.
pub struct CommandOcrEngine {
    program: String,
    args: Vec<String>,
}

impl CommandOcrEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    fn render_args(&self, input: &OcrInput) -> Vec<String> {
        let file = input.file.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{file}", &file).replace("{lang}", &input.lang))
            .collect()
    }

    /// Split engine output into pages on form-feed boundaries
    pub fn split_pages(output: &str) -> Vec<PageText> {
        let mut segments: Vec<&str> = output.split('\u{000C}').collect();
        // A trailing form feed closes the last page rather than opening a new one
        if segments.len() > 1 && segments.last().is_some_and(|s| s.trim().is_empty()) {
            segments.pop();
        }

        segments
            .into_iter()
            .enumerate()
            .map(|(index, text)| PageText {
                index,
                text: text.trim().to_string(),
            })
            .collect()
    }
}

#[async_trait]
impl OcrEngine for CommandOcrEngine {
    async fn extract(&self, input: &OcrInput) -> Result<Vec<PageText>> {
        if !input.file.exists() {
            return Err(Error::ocr(format!(
                "source file {} does not exist",
                input.file.display()
            )));
        }

        let args = self.render_args(input);
        tracing::debug!(program = %self.program, ?args, "Running OCR command");

        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ocr(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ocr(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Self::split_pages(&stdout))
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        &self.program
    }
}
