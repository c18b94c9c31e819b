/*!
 * Worker pool shared by every backend.
 *
 * `WorkerQueue` implements claiming, retries with backoff, progress and lease
 * upkeep once, on top of any `JobBackend`. Each registered kind gets a fixed
 * number of worker tasks that claim jobs atomically, so a job never runs
 * twice at the same time.
 */

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::app_config::QueueConfig;
use crate::errors::{JobFailure, QueueError};
use crate::queue::job::offset;
use crate::queue::{ErrorReporter, Job, JobBackend, JobContext, JobHandler, JobQueue, JobState, NewJob, QueueStats};
use crate::translation::retry::RetryPolicy;

/// Tuning of a worker queue
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Used when a job does not set its own ceiling
    pub default_max_attempts: u32,
    /// Delay between attempts of a failed job
    pub backoff: RetryPolicy,
    pub poll_interval: Duration,
    pub lease: Duration,
    /// Completed jobs older than this are removed; zero keeps them
    pub completed_retention: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        let base = Duration::from_millis(config.job_backoff_ms);
        Self {
            default_max_attempts: config.max_attempts,
            backoff: RetryPolicy::new(config.max_attempts, base, base.saturating_mul(32)),
            poll_interval: config.poll_interval(),
            lease: config.lease(),
            completed_retention: Duration::from_secs(config.completed_retention_secs),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

struct Inner<B: JobBackend> {
    backend: B,
    settings: WorkerSettings,
    notify: Notify,
    shutdown_tx: watch::Sender<bool>,
    errors: ErrorReporter,
}

/// Generic queue: worker pool over a job backend
pub struct WorkerQueue<B: JobBackend> {
    inner: Arc<Inner<B>>,
    kinds: Mutex<HashSet<String>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    maintenance_started: AtomicBool,
}

impl<B: JobBackend> WorkerQueue<B> {
    pub fn new(backend: B, settings: WorkerSettings, errors: ErrorReporter) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                backend,
                settings,
                notify: Notify::new(),
                shutdown_tx,
                errors,
            }),
            kinds: Mutex::new(HashSet::new()),
            handles: Mutex::new(Vec::new()),
            maintenance_started: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.inner.settings
    }

    fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    fn start_maintenance(&self) {
        if self.maintenance_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        let shutdown = self.inner.shutdown_tx.subscribe();
        self.handles.lock().push(tokio::spawn(maintenance_loop(inner, shutdown)));
    }
}

impl<B: JobBackend> Inner<B> {
    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(self.settings.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    /// Run one claimed job and record its outcome
    async fn execute(self: &Arc<Self>, job: Job, handler: &dyn JobHandler) {
        let id = job.id.clone();
        debug!(
            "Running job {} ({}) attempt {}/{} on {}",
            id,
            job.kind,
            job.attempts,
            job.max_attempts,
            self.backend.name()
        );

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_job(self.clone(), id.clone(), progress_rx, done_rx));

        let outcome = AssertUnwindSafe(handler.handle(JobContext::new(job.clone(), progress_tx)))
            .catch_unwind()
            .await;
        let _ = done_tx.send(());
        let _ = monitor.await;

        let result = outcome.unwrap_or_else(|_| Err(JobFailure::Retryable("job handler panicked".to_string())));
        let now = Utc::now();
        let recorded = match result {
            Ok(value) => {
                info!("Job {} ({}) completed", id, job.kind);
                self.backend.complete(&id, value, now).await
            }
            Err(failure) if failure.is_terminal() || job.is_final_attempt() => {
                error!(
                    "Job {} ({}) failed after {} attempt(s): {}",
                    id, job.kind, job.attempts, failure
                );
                self.backend.fail(&id, &failure.to_string(), now).await
            }
            Err(failure) => {
                let delay = self.settings.backoff.delay_for(job.attempts);
                warn!(
                    "Job {} ({}) attempt {}/{} failed, retrying in {:?}: {}",
                    id, job.kind, job.attempts, job.max_attempts, delay, failure
                );
                let recorded = self.backend.retry(&id, &failure.to_string(), offset(now, delay)).await;
                self.notify.notify_waiters();
                recorded
            }
        };

        if let Err(e) = recorded {
            error!("Could not record outcome of job {}: {}", id, e);
            self.errors.report(e);
        }
    }
}

/// Persist progress updates and keep the lease alive while a job runs
async fn monitor_job<B: JobBackend>(
    inner: Arc<Inner<B>>,
    id: String,
    mut progress: mpsc::UnboundedReceiver<u8>,
    mut done: oneshot::Receiver<()>,
) {
    let heartbeat_every = (inner.settings.lease / 3).max(Duration::from_millis(100));
    let mut heartbeat = tokio::time::interval(heartbeat_every);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            update = progress.recv() => match update {
                Some(p) => {
                    if let Err(e) = inner.backend.set_progress(&id, p).await {
                        debug!("Progress update of job {} failed: {}", id, e);
                    }
                }
                None => break,
            },
            _ = heartbeat.tick() => {
                if let Err(e) = inner.backend.extend_lease(&id, Utc::now()).await {
                    warn!("Lease renewal of job {} failed: {}", id, e);
                    inner.errors.report(e);
                }
            }
            _ = &mut done => {
                let mut last = None;
                while let Ok(p) = progress.try_recv() {
                    last = Some(p);
                }
                if let Some(p) = last {
                    let _ = inner.backend.set_progress(&id, p).await;
                }
                break;
            }
        }
    }
}

async fn worker_loop<B: JobBackend>(
    inner: Arc<Inner<B>>,
    kind: String,
    handler: Arc<dyn JobHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match inner.backend.claim(&kind, Utc::now()).await {
            Ok(Some(job)) => inner.execute(job, handler.as_ref()).await,
            Ok(None) => inner.idle(&mut shutdown).await,
            Err(e) => {
                warn!("Worker for '{}' could not claim from {}: {}", kind, inner.backend.name(), e);
                inner.errors.report(e);
                inner.idle(&mut shutdown).await;
            }
        }
    }
    debug!("Worker for '{}' on {} stopped", kind, inner.backend.name());
}

/// Stalled-job recovery and retention cleanup
async fn maintenance_loop<B: JobBackend>(inner: Arc<Inner<B>>, mut shutdown: watch::Receiver<bool>) {
    let every = (inner.settings.lease / 2).max(inner.settings.poll_interval);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        let now = Utc::now();
        match inner.backend.recover_stalled(now).await {
            Ok(0) => {}
            Ok(n) => {
                info!("Recovered {} stalled job(s) on {}", n, inner.backend.name());
                inner.notify.notify_waiters();
            }
            Err(e) => inner.errors.report(e),
        }

        if !inner.settings.completed_retention.is_zero() {
            let cutoff = now - chrono::Duration::from_std(inner.settings.completed_retention).unwrap_or_else(|_| chrono::Duration::zero());
            if let Err(e) = inner.backend.clean(JobState::Completed, cutoff).await {
                debug!("Retention cleanup failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl<B: JobBackend> JobQueue for WorkerQueue<B> {
    fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    async fn enqueue(&self, job: NewJob) -> Result<Job, QueueError> {
        if self.is_shut_down() {
            return Err(QueueError::Closed);
        }
        let job = Job::from_new(job, self.inner.settings.default_max_attempts, Utc::now());
        self.inner.backend.insert(&job).await?;
        debug!("Enqueued job {} ({}) on {}", job.id, job.kind, self.backend_name());
        self.inner.notify.notify_waiters();
        Ok(job)
    }

    async fn register_processor(
        &self,
        kind: &str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), QueueError> {
        if self.is_shut_down() {
            return Err(QueueError::Closed);
        }
        if !self.kinds.lock().insert(kind.to_string()) {
            warn!("Processor for '{}' already registered on {}", kind, self.backend_name());
            return Ok(());
        }

        self.start_maintenance();
        let mut handles = self.handles.lock();
        for _ in 0..concurrency.max(1) {
            handles.push(tokio::spawn(worker_loop(
                self.inner.clone(),
                kind.to_string(),
                handler.clone(),
                self.inner.shutdown_tx.subscribe(),
            )));
        }
        info!(
            "Registered {} worker(s) for '{}' on {}",
            concurrency.max(1),
            kind,
            self.backend_name()
        );
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, QueueError> {
        self.inner.backend.get(id).await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.inner.backend.stats(Utc::now()).await
    }

    async fn clean(&self, state: JobState, grace: Duration) -> Result<usize, QueueError> {
        if !matches!(state, JobState::Completed | JobState::Failed) {
            return Err(QueueError::Backend(format!("cannot clean {} jobs", state)));
        }
        let cutoff = Utc::now() - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        self.inner.backend.clean(state, cutoff).await
    }

    async fn remove(&self, id: &str) -> Result<bool, QueueError> {
        self.inner.backend.remove_waiting(id).await
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.inner.backend.ping().await
    }

    async fn drain_waiting(&self) -> Result<Vec<Job>, QueueError> {
        self.inner.backend.take_waiting().await
    }

    async fn shutdown(&self) {
        if self.inner.shutdown_tx.send_replace(true) {
            return;
        }
        info!("Shutting down {} queue", self.backend_name());
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TerminalReason;
    use crate::queue::handler_fn;
    use crate::queue::memory::MemoryBackend;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            default_max_attempts: 3,
            backoff: RetryPolicy::new(3, Duration::from_millis(20), Duration::from_millis(100)).without_jitter(),
            poll_interval: Duration::from_millis(10),
            lease: Duration::from_secs(30),
            completed_retention: Duration::ZERO,
        }
    }

    fn queue() -> WorkerQueue<MemoryBackend> {
        WorkerQueue::new(MemoryBackend::new(), settings(), ErrorReporter::disabled())
    }

    async fn wait_for_state(queue: &WorkerQueue<MemoryBackend>, id: &str, state: JobState) -> Job {
        for _ in 0..300 {
            if let Some(job) = queue.get_job(id).await.unwrap() {
                if job.state == state {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", id, state);
    }

    #[tokio::test]
    async fn test_registeredProcessor_shouldCompleteJobWithReturnValue() {
        let queue = queue();
        queue
            .register_processor("echo", 2, handler_fn(|ctx: JobContext| async move {
                ctx.report_progress(50);
                Ok(Some(ctx.job.payload.clone()))
            }))
            .await
            .unwrap();

        let job = queue.enqueue(NewJob::new("echo", json!({"n": 1}))).await.unwrap();
        let done = wait_for_state(&queue, &job.id, JobState::Completed).await;
        assert_eq!(done.return_value, Some(json!({"n": 1})));
        assert_eq!(done.progress, 100);
        assert_eq!(done.attempts, 1);
    }

    #[tokio::test]
    async fn test_retryableFailure_shouldRetryUntilSuccess() {
        let queue = queue();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        queue
            .register_processor("flaky", 1, handler_fn(move |_ctx: JobContext| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(JobFailure::Retryable("temporary".into()))
                    } else {
                        Ok(None)
                    }
                }
            }))
            .await
            .unwrap();

        let job = queue.enqueue(NewJob::new("flaky", json!(null))).await.unwrap();
        let done = wait_for_state(&queue, &job.id, JobState::Completed).await;
        assert_eq!(done.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminalFailure_shouldSkipRemainingAttempts() {
        let queue = queue();
        queue
            .register_processor("gone", 1, handler_fn(|_ctx: JobContext| async move {
                Err(JobFailure::Terminal(TerminalReason::ResourceNotFound("r1".into())))
            }))
            .await
            .unwrap();

        let job = queue.enqueue(NewJob::new("gone", json!(null))).await.unwrap();
        let failed = wait_for_state(&queue, &job.id, JobState::Failed).await;
        assert_eq!(failed.attempts, 1);
        assert!(failed.failed_reason.unwrap().contains("r1"));
    }

    #[tokio::test]
    async fn test_exhaustedAttempts_shouldFailAndFlagFinalAttempt() {
        let queue = queue();
        let finals = Arc::new(AtomicU32::new(0));
        let seen = finals.clone();
        queue
            .register_processor("broken", 1, handler_fn(move |ctx: JobContext| {
                let seen = seen.clone();
                async move {
                    if ctx.is_final_attempt() {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(JobFailure::Retryable("still broken".into()))
                }
            }))
            .await
            .unwrap();

        let job = queue.enqueue(NewJob::new("broken", json!(null)).with_max_attempts(2)).await.unwrap();
        let failed = wait_for_state(&queue, &job.id, JobState::Failed).await;
        assert_eq!(failed.attempts, 2);
        assert_eq!(finals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panickingHandler_shouldCountAsFailedAttempt() {
        let queue = queue();
        queue
            .register_processor("panics", 1, handler_fn(|_ctx: JobContext| async move {
                if true {
                    panic!("boom");
                }
                Ok(None)
            }))
            .await
            .unwrap();

        let job = queue.enqueue(NewJob::new("panics", json!(null)).with_max_attempts(1)).await.unwrap();
        let failed = wait_for_state(&queue, &job.id, JobState::Failed).await;
        assert!(failed.failed_reason.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_remove_shouldOnlyAffectWaitingJobs() {
        let queue = queue();
        let job = queue.enqueue(NewJob::new("idle", json!(null))).await.unwrap();
        assert!(queue.remove(&job.id).await.unwrap());
        assert!(queue.get_job(&job.id).await.unwrap().is_none());
        assert!(!queue.remove(&job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_shouldRejectNewJobs() {
        let queue = queue();
        queue.shutdown().await;
        assert!(matches!(queue.enqueue(NewJob::new("x", json!(null))).await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_delayedJob_shouldWaitForRunAt() {
        let queue = queue();
        queue
            .register_processor("later", 1, handler_fn(|_ctx: JobContext| async move { Ok(None) }))
            .await
            .unwrap();
        let job = queue
            .enqueue(NewJob::new("later", json!(null)).with_delay(Duration::from_millis(150)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.get_job(&job.id).await.unwrap().unwrap().state, JobState::Waiting);
        wait_for_state(&queue, &job.id, JobState::Completed).await;
    }
}
