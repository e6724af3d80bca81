//! Configuration for OCR workers and storage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolioConfig {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// OCR engine configuration
    #[serde(default)]
    pub ocr: OcrConfig,
    /// Worker pool configuration
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl FolioConfig {
    /// Parse configuration from TOML text; missing sections take defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject values the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ocr.command.trim().is_empty() {
            return Err(Error::config("ocr.command must not be empty"));
        }
        if self.ocr.timeout_secs == 0 {
            return Err(Error::config("ocr.timeout_secs must be greater than zero"));
        }
        if self.worker.queue_capacity == 0 {
            return Err(Error::config("worker.queue_capacity must be greater than zero"));
        }
        if self.worker.max_attempts == 0 {
            return Err(Error::config("worker.max_attempts must be at least 1"));
        }
        if self.worker.parallel_jobs == Some(0) {
            return Err(Error::config("worker.parallel_jobs must be greater than zero"));
        }
        Ok(())
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    pub database_path: PathBuf,
    /// Root directory holding version files (`user_<id>/document_<id>/v<n>/`)
    pub media_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
            .join("folio");

        Self {
            database_path: base.join("folio.db"),
            media_root: base.join("media"),
        }
    }
}

/// OCR engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Program to run
    pub command: String,
    /// Arguments; `{file}` and `{lang}` are substituted
    pub args: Vec<String>,
    /// Language used when a request does not name one
    pub default_lang: String,
    /// Upper bound for a single extraction
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: "tesseract".to_string(),
            args: vec![
                "{file}".to_string(),
                "stdout".to_string(),
                "-l".to_string(),
                "{lang}".to_string(),
            ],
            default_lang: "eng".to_string(),
            timeout_secs: 600, // 10 minutes, large scans are slow
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent jobs per worker (default: CPU count, max 8)
    pub parallel_jobs: Option<usize>,
    /// Capacity of the job channel
    pub queue_capacity: usize,
    /// Deliveries per job before it is marked failed
    pub max_attempts: u32,
    /// Upper bound for a whole job, OCR included
    pub job_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            parallel_jobs: None,
            queue_capacity: 1000,
            max_attempts: 3,
            job_timeout_secs: 900,
        }
    }
}

impl WorkerConfig {
    pub fn effective_parallel_jobs(&self) -> usize {
        self.parallel_jobs
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = FolioConfig::from_toml_str(
            r#"
            [worker]
            parallel_jobs = 2
            queue_capacity = 10
            max_attempts = 5
            job_timeout_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.effective_parallel_jobs(), 2);
        assert_eq!(config.worker.max_attempts, 5);
        assert_eq!(config.ocr.command, "tesseract");
        assert_eq!(config.ocr.timeout_secs, 600);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = FolioConfig::from_toml_str(
            r#"
            [ocr]
            command = ""
            args = []
            default_lang = "eng"
            timeout_secs = 5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(
            &path,
            r#"
            [storage]
            database_path = "/var/lib/folio/folio.db"
            media_root = "/var/lib/folio/media"
            "#,
        )
        .unwrap();

        let config = FolioConfig::load(&path).unwrap();
        assert_eq!(config.storage.media_root, PathBuf::from("/var/lib/folio/media"));
    }
}
