/*!
 * Job queue with a durable backend and an in-process fallback.
 *
 * - `job`: job records and statistics
 * - `worker`: the generic worker pool shared by both backends
 * - `memory`: single-process backend
 * - `durable`: SQLite backend shared by several processes
 * - `supervisor`: owns the active queue and fails over between backends
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::errors::{JobFailure, QueueError};

pub use self::job::{Job, JobState, NewJob, QueueStats};
pub use self::supervisor::{QueueRuntime, QueueSupervisor};
pub use self::worker::{WorkerQueue, WorkerSettings};

pub mod durable;
pub mod job;
pub mod memory;
pub mod supervisor;
pub mod worker;

/// What a handler returns: an optional return value or a failure
pub type JobResult = Result<Option<Value>, JobFailure>;

/// Operations every queue offers, whatever its backend
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Short backend name for logs and stats
    fn backend_name(&self) -> &'static str;

    async fn enqueue(&self, job: NewJob) -> Result<Job, QueueError>;

    /// Start `concurrency` workers for jobs of `kind`
    async fn register_processor(
        &self,
        kind: &str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), QueueError>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Remove finished jobs in `state` that finished more than `grace` ago
    async fn clean(&self, state: JobState, grace: Duration) -> Result<usize, QueueError>;

    /// Remove a job that has not been picked up yet
    async fn remove(&self, id: &str) -> Result<bool, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;

    /// Take every waiting job out of the queue
    async fn drain_waiting(&self) -> Result<Vec<Job>, QueueError>;

    /// Stop claiming new jobs; running jobs finish on their own
    async fn shutdown(&self);
}

/// Storage used by `WorkerQueue`
#[async_trait]
pub trait JobBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn insert(&self, job: &Job) -> Result<(), QueueError>;

    /// Atomically move the oldest due waiting job of `kind` to active,
    /// counting the attempt
    async fn claim(&self, kind: &str, now: DateTime<Utc>) -> Result<Option<Job>, QueueError>;

    /// Keep a claimed job locked to the current worker
    async fn extend_lease(&self, _id: &str, _now: DateTime<Utc>) -> Result<(), QueueError> {
        Ok(())
    }

    async fn set_progress(&self, id: &str, progress: u8) -> Result<(), QueueError>;

    async fn complete(&self, id: &str, return_value: Option<Value>, now: DateTime<Utc>) -> Result<(), QueueError>;

    /// Put an active job back to waiting until `run_at`
    async fn retry(&self, id: &str, reason: &str, run_at: DateTime<Utc>) -> Result<(), QueueError>;

    async fn fail(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<(), QueueError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, QueueError>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats, QueueError>;

    async fn clean(&self, state: JobState, finished_before: DateTime<Utc>) -> Result<usize, QueueError>;

    async fn remove_waiting(&self, id: &str) -> Result<bool, QueueError>;

    async fn take_waiting(&self) -> Result<Vec<Job>, QueueError>;

    /// Return active jobs whose lease expired to waiting (or failed when out of attempts)
    async fn recover_stalled(&self, _now: DateTime<Utc>) -> Result<usize, QueueError> {
        Ok(0)
    }

    async fn ping(&self) -> Result<(), QueueError>;
}

/// Processes jobs of one kind
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: JobContext) -> JobResult;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext) -> JobResult {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// The job being executed and a channel for its progress
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: Job,
    progress: mpsc::UnboundedSender<u8>,
}

impl JobContext {
    pub fn new(job: Job, progress: mpsc::UnboundedSender<u8>) -> Self {
        Self { job, progress }
    }

    /// Record progress (0..=100); never blocks
    pub fn report_progress(&self, progress: u8) {
        let _ = self.progress.send(progress.min(100));
    }

    pub fn is_final_attempt(&self) -> bool {
        self.job.is_final_attempt()
    }
}

/// Forwards backend errors of one queue instance to the supervisor
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    generation: u64,
    tx: Option<mpsc::UnboundedSender<(u64, QueueError)>>,
}

impl ErrorReporter {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, QueueError)>) -> Self {
        Self { generation, tx: Some(tx) }
    }

    /// A reporter that drops everything
    pub fn disabled() -> Self {
        Self { generation: 0, tx: None }
    }

    pub fn report(&self, error: QueueError) {
        if let Some(tx) = &self.tx {
            let _ = tx.send((self.generation, error));
        }
    }
}

/// Builds queue instances for the supervisor
#[async_trait]
pub trait QueueFactory: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create(&self, errors: ErrorReporter) -> Result<Arc<dyn JobQueue>, QueueError>;

    /// Cheap reachability check of the underlying backend
    async fn probe(&self) -> Result<(), QueueError>;
}
