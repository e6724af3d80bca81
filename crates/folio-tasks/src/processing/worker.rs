//! Background worker for processing jobs

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::config::WorkerConfig;
use crate::error::Error;

use super::executor::OcrJobExecutor;
use super::job_queue::{Job, JobQueue, JobReceiver, JobResult, QueuedJob};
use super::tree_normalizer::TreeNormalizer;

/// Worker draining the job queue with bounded parallelism
#[derive(Clone)]
pub struct JobWorker {
    executor: Arc<OcrJobExecutor>,
    normalizer: Arc<TreeNormalizer>,
    job_queue: Arc<JobQueue>,
    parallel_jobs: usize,
    job_timeout: Duration,
}

impl JobWorker {
    /// Create a new worker
    pub fn new(
        executor: Arc<OcrJobExecutor>,
        normalizer: Arc<TreeNormalizer>,
        job_queue: Arc<JobQueue>,
        config: &WorkerConfig,
    ) -> Self {
        let parallel_jobs = config.effective_parallel_jobs();

        tracing::info!(
            "Worker configured: {} parallel jobs, {}s job timeout, {} attempts per job",
            parallel_jobs,
            config.job_timeout_secs,
            job_queue.max_attempts()
        );

        Self {
            executor,
            normalizer,
            job_queue,
            parallel_jobs,
            job_timeout: Duration::from_secs(config.job_timeout_secs),
        }
    }

    /// Process jobs until the channel closes
    pub async fn run(self, receiver: JobReceiver) {
        self.run_until(receiver, std::future::pending()).await
    }

    /// Process jobs until the channel closes or `shutdown` resolves.
    ///
    /// Jobs already started are awaited before returning.
    pub async fn run_until<F>(self, mut receiver: JobReceiver, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Job worker started: {} parallel jobs", self.parallel_jobs);

        let semaphore = Arc::new(Semaphore::new(self.parallel_jobs));
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            let queued = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = receiver.recv() => match next {
                    Some(queued) => queued,
                    None => break,
                },
            };

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let worker = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.process(queued).await;
            });

            while tasks.try_join_next().is_some() {}
        }

        while tasks.join_next().await.is_some() {}
        tracing::info!("Job worker stopped");
    }

    /// Run one delivery of a job and record its result
    pub async fn process(&self, queued: QueuedJob) {
        let job_id = queued.id;
        self.job_queue.mark_running(job_id, queued.attempt);
        tracing::info!("Processing job {} (attempt {})", job_id, queued.attempt);

        match queued.job.clone() {
            Job::Ocr(request) => {
                let result = timeout(self.job_timeout, self.executor.run(&request)).await;
                match result {
                    Ok(Ok(outcome)) if outcome.is_success() => {
                        tracing::info!("Job {} completed: {}", job_id, outcome);
                        self.job_queue.mark_succeeded(job_id, JobResult::Ocr(outcome));
                    }
                    Ok(Ok(outcome)) if outcome.should_retry() => {
                        let reason = outcome.to_string();
                        self.retry_or_fail(queued, Some(JobResult::Ocr(outcome)), reason).await;
                    }
                    Ok(Ok(outcome)) => {
                        tracing::error!("Job {} failed: {}", job_id, outcome);
                        let reason = outcome.to_string();
                        self.job_queue.mark_failed(job_id, Some(JobResult::Ocr(outcome)), reason);
                    }
                    Ok(Err(e)) => self.handle_error(queued, e, true).await,
                    Err(_) => {
                        tracing::error!(
                            "TIMEOUT: job {} exceeded {}s",
                            job_id,
                            self.job_timeout.as_secs()
                        );
                        let reason = format!("job timed out after {}s", self.job_timeout.as_secs());
                        self.retry_or_fail(queued, None, reason).await;
                    }
                }
            }
            Job::Normalize(request) => {
                let normalizer = self.normalizer.clone();
                let origin = request.origin;
                let rerunnable = normalizer.is_idempotent();

                match tokio::task::spawn_blocking(move || normalizer.normalize(&origin)).await {
                    Ok(Ok(report)) => {
                        tracing::info!("Job {} normalized {} pages", job_id, report.pages);
                        self.job_queue.mark_succeeded(job_id, JobResult::Normalize(report));
                    }
                    Ok(Err(e)) => self.handle_error(queued, e, rerunnable).await,
                    Err(e) => {
                        tracing::error!("Normalization task for job {} panicked: {}", job_id, e);
                        self.job_queue.mark_failed(job_id, None, format!("task failed: {}", e));
                    }
                }
            }
        }
    }

    async fn handle_error(&self, queued: QueuedJob, error: Error, rerunnable: bool) {
        if rerunnable && error.is_retryable() {
            tracing::warn!("Job {} attempt {} failed: {}", queued.id, queued.attempt, error);
            self.retry_or_fail(queued, None, error.to_string()).await;
        } else {
            tracing::error!("Job {} failed permanently: {}", queued.id, error);
            self.job_queue.mark_failed(queued.id, None, error.to_string());
        }
    }

    async fn retry_or_fail(&self, queued: QueuedJob, result: Option<JobResult>, reason: String) {
        let job_id = queued.id;
        let attempt = queued.attempt;

        if !self.job_queue.redeliver(queued) {
            tracing::error!("Job {} failed after {} attempts: {}", job_id, attempt, reason);
            self.job_queue.mark_failed(job_id, result, reason);
        }
    }
}
