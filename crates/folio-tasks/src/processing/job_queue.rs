//! Job queue for background OCR and normalization jobs
//!
//! Delivery is at-least-once: a job whose attempt fails with a retryable
//! cause is sent again until `max_attempts` deliveries have been made.
//! Redeliveries travel on an unbounded side channel so a worker holding a
//! permit never waits on a full submission channel.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{NormalizeRequest, OcrRequest};

use super::executor::JobOutcome;
use super::tree_normalizer::NormalizeReport;

/// A unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    Ocr(OcrRequest),
    Normalize(NormalizeRequest),
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Ocr(_) => JobKind::Ocr,
            Self::Normalize(_) => JobKind::Normalize,
        }
    }
}

/// Job type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ocr,
    Normalize,
}

/// A job as delivered to a worker
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    /// 1 on first delivery
    pub attempt: u32,
    pub job: Job,
}

/// Job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// What a finished job produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobResult {
    Ocr(JobOutcome),
    Normalize(NormalizeReport),
}

/// Progress information for a job
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub attempts: u32,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl JobProgress {
    pub fn new(job_id: Uuid, kind: JobKind) -> Self {
        let now = chrono::Utc::now();
        Self {
            job_id,
            kind,
            status: JobStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Receiving end handed to a worker.
///
/// Redelivered jobs are yielded before new submissions.
pub struct JobReceiver {
    jobs: mpsc::Receiver<QueuedJob>,
    retries: mpsc::UnboundedReceiver<QueuedJob>,
}

impl JobReceiver {
    /// Next job to run, or `None` once the queue is dropped and drained
    pub async fn recv(&mut self) -> Option<QueuedJob> {
        let next = tokio::select! {
            biased;
            Some(job) = self.retries.recv() => Some(job),
            job = self.jobs.recv() => job,
        };
        match next {
            Some(job) => Some(job),
            None => self.retries.try_recv().ok(),
        }
    }
}

/// Job queue managing background processing
pub struct JobQueue {
    /// Known jobs with progress
    jobs: Arc<DashMap<Uuid, JobProgress>>,
    /// Channel for sending jobs to workers
    sender: mpsc::Sender<QueuedJob>,
    retries: mpsc::UnboundedSender<QueuedJob>,
    /// Deliveries allowed per job
    max_attempts: u32,
    /// Jobs not yet in a terminal state
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl JobQueue {
    /// Create a new job queue
    pub fn new(capacity: usize, max_attempts: u32) -> (Self, JobReceiver) {
        let (sender, jobs) = mpsc::channel(capacity.max(1));
        let (retries, retry_receiver) = mpsc::unbounded_channel();

        let queue = Self {
            jobs: Arc::new(DashMap::new()),
            sender,
            retries,
            max_attempts: max_attempts.max(1),
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        };

        (queue, JobReceiver { jobs, retries: retry_receiver })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Submit a job for processing
    pub async fn submit(&self, job: Job) -> Result<Uuid> {
        let job_id = Uuid::new_v4();
        self.jobs.insert(job_id, JobProgress::new(job_id, job.kind()));
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let queued = QueuedJob {
            id: job_id,
            attempt: 1,
            job,
        };

        if let Err(e) = self.sender.send(queued).await {
            tracing::error!("Failed to submit job {}: {}", job_id, e);
            self.mark_failed(job_id, None, format!("queue closed: {}", e));
            return Err(Error::queue(format!("failed to submit job {}: queue closed", job_id)));
        }

        tracing::debug!("Submitted job {}", job_id);
        Ok(job_id)
    }

    /// Deliver a job again if it has attempts left.
    ///
    /// Returns `false` once the job has used all its deliveries; the caller
    /// then marks it failed. Never waits for channel capacity.
    pub fn redeliver(&self, job: QueuedJob) -> bool {
        if job.attempt >= self.max_attempts {
            return false;
        }

        let job_id = job.id;
        let attempt = job.attempt + 1;
        let next = QueuedJob { attempt, ..job };
        self.set_status(job_id, JobStatus::Retrying);

        if let Err(e) = self.retries.send(next) {
            tracing::error!("Failed to redeliver job {}: {}", job_id, e);
            return false;
        }

        tracing::info!("Redelivered job {} (attempt {})", job_id, attempt);
        true
    }

    /// Mark a job as picked up by a worker
    pub fn mark_running(&self, job_id: Uuid, attempt: u32) {
        if let Some(mut progress) = self.jobs.get_mut(&job_id) {
            progress.status = JobStatus::Running;
            progress.attempts = attempt;
            progress.updated_at = chrono::Utc::now();
        }
    }

    /// Mark a job as finished successfully
    pub fn mark_succeeded(&self, job_id: Uuid, result: JobResult) {
        self.finish(job_id, JobStatus::Succeeded, Some(result), None);
    }

    /// Mark a job as terminally failed
    pub fn mark_failed(&self, job_id: Uuid, result: Option<JobResult>, error: String) {
        self.finish(job_id, JobStatus::Failed, result, Some(error));
    }

    fn finish(&self, job_id: Uuid, status: JobStatus, result: Option<JobResult>, error: Option<String>) {
        let was_terminal = match self.jobs.get_mut(&job_id) {
            Some(mut progress) => {
                let was_terminal = progress.status.is_terminal();
                progress.status = status;
                progress.result = result;
                progress.error = error;
                progress.updated_at = chrono::Utc::now();
                was_terminal
            }
            None => return,
        };

        if !was_terminal && self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn set_status(&self, job_id: Uuid, status: JobStatus) {
        if let Some(mut progress) = self.jobs.get_mut(&job_id) {
            progress.status = status;
            progress.updated_at = chrono::Utc::now();
        }
    }

    /// Wait until every submitted job has reached a terminal state
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Number of jobs not yet succeeded or failed
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Get job progress
    pub fn get_progress(&self, job_id: Uuid) -> Option<JobProgress> {
        self.jobs.get(&job_id).map(|p| p.clone())
    }

    /// Get all jobs
    pub fn list_jobs(&self) -> Vec<JobProgress> {
        self.jobs.iter().map(|e| e.value().clone()).collect()
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let count = |status: JobStatus| self.jobs.iter().filter(|j| j.status == status).count();

        QueueStats {
            total_jobs: self.jobs.len(),
            pending: count(JobStatus::Pending),
            running: count(JobStatus::Running),
            retrying: count(JobStatus::Retrying),
            succeeded: count(JobStatus::Succeeded),
            failed: count(JobStatus::Failed),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total_jobs: usize,
    pub pending: usize,
    pub running: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentId, FolderId};

    #[tokio::test]
    async fn test_submit_and_receive() {
        let (queue, mut receiver) = JobQueue::new(8, 3);
        let request = OcrRequest::new(DocumentId::new(), "en");

        let id = queue.submit(Job::Ocr(request.clone())).await.unwrap();
        let delivered = receiver.recv().await.unwrap();

        assert_eq!(delivered.id, id);
        assert_eq!(delivered.attempt, 1);
        assert_eq!(delivered.job, Job::Ocr(request));
        assert_eq!(queue.get_progress(id).unwrap().status, JobStatus::Pending);
        assert_eq!(queue.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_redeliver_until_max_attempts() {
        let (queue, mut receiver) = JobQueue::new(8, 2);
        queue
            .submit(Job::Normalize(NormalizeRequest::new(FolderId::new())))
            .await
            .unwrap();

        let first = receiver.recv().await.unwrap();
        assert!(queue.redeliver(first));
        assert_eq!(queue.get_progress(job_id_of(&queue)).unwrap().status, JobStatus::Retrying);

        let second = receiver.recv().await.unwrap();
        assert_eq!(second.attempt, 2);
        assert!(!queue.redeliver(second));
    }

    #[tokio::test]
    async fn test_redelivery_skips_full_channel() {
        let (queue, mut receiver) = JobQueue::new(1, 3);
        queue.submit(Job::Ocr(OcrRequest::new(DocumentId::new(), "en"))).await.unwrap();
        let first = receiver.recv().await.unwrap();
        let waiting = queue.submit(Job::Ocr(OcrRequest::new(DocumentId::new(), "en"))).await.unwrap();

        // Submission channel is full; redelivery must not block on it
        assert!(queue.redeliver(first.clone()));

        let next = receiver.recv().await.unwrap();
        assert_eq!(next.id, first.id);
        assert_eq!(next.attempt, 2);
        assert_eq!(receiver.recv().await.unwrap().id, waiting);
    }

    fn job_id_of(queue: &JobQueue) -> Uuid {
        queue.list_jobs()[0].job_id
    }

    #[tokio::test]
    async fn test_wait_idle_after_terminal_states() {
        let (queue, _receiver) = JobQueue::new(8, 1);
        let a = queue.submit(Job::Ocr(OcrRequest::new(DocumentId::new(), "en"))).await.unwrap();
        let b = queue.submit(Job::Ocr(OcrRequest::new(DocumentId::new(), "en"))).await.unwrap();

        queue.mark_succeeded(
            a,
            JobResult::Ocr(JobOutcome::Succeeded { document_id: DocumentId::new(), version: 2, pages: 1 }),
        );
        queue.mark_failed(b, None, "engine unavailable".to_string());
        // A second terminal mark must not underflow the counter
        queue.mark_failed(b, None, "again".to_string());

        tokio::time::timeout(std::time::Duration::from_secs(1), queue.wait_idle())
            .await
            .unwrap();

        let stats = queue.stats();
        assert_eq!(stats.total_jobs, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_job_wire_format() {
        let id = DocumentId::new();
        let job = Job::Ocr(OcrRequest::new(id, "en"));
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "ocr");
        assert_eq!(json["documentId"], id.to_string());
    }
}
