//! Job execution: OCR versioning, tree normalization, queueing and workers

mod executor;
mod job_queue;
mod tree_normalizer;
mod version_manager;
mod worker;

pub use executor::{JobOutcome, OcrJobExecutor};
pub use job_queue::{
    Job, JobKind, JobProgress, JobQueue, JobReceiver, JobResult, JobStatus, QueueStats, QueuedJob,
};
pub use tree_normalizer::{NormalizeReport, TreeNormalizer};
pub use version_manager::{DocumentLease, VersionManager};
pub use worker::JobWorker;
