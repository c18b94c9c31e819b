/*!
 * Queue supervision and failover.
 *
 * The supervisor owns the active queue. It starts on the durable backend when
 * it can, and swaps to the in-process fallback the first time the durable
 * backend reports a connectivity error. Callers only ever see the supervisor,
 * so the swap is invisible to them.
 *
 * Switching back is never automatic: the health probe only records that the
 * durable backend is reachable again, and `reinitialize` moves back on demand.
 */

use anyhow::Result;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::app_config::QueueConfig;
use crate::database::DatabaseConnection;
use crate::errors::QueueError;
use crate::queue::durable::SqliteQueueFactory;
use crate::queue::memory::{MemoryBackend, MemoryQueueFactory};
use crate::queue::worker::WorkerQueue;
use crate::queue::{
    ErrorReporter, Job, JobHandler, JobQueue, JobState, NewJob, QueueFactory, QueueStats, WorkerSettings,
};
use crate::translation::cache::TranslationCache;
use crate::translation::rate_limiter::RateLimiter;

#[derive(Clone)]
struct Registration {
    kind: String,
    concurrency: usize,
    handler: Arc<dyn JobHandler>,
}

#[derive(Clone)]
struct ActiveQueue {
    queue: Arc<dyn JobQueue>,
    /// Errors reported by older instances are ignored
    generation: u64,
}

/// State shared by everything that runs jobs in this process
pub struct QueueRuntime {
    active: RwLock<ActiveQueue>,
    processors: Mutex<Vec<Registration>>,
    failed_over: AtomicBool,
    backend_recovered: AtomicBool,
    next_generation: AtomicU64,
    limiter: Arc<RateLimiter>,
    cache: TranslationCache,
}

impl QueueRuntime {
    /// The queue currently accepting jobs
    pub fn active(&self) -> Arc<dyn JobQueue> {
        self.active.read().queue.clone()
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    /// Running on the fallback because the durable backend failed
    pub fn is_failed_over(&self) -> bool {
        self.failed_over.load(Ordering::SeqCst)
    }

    /// The health probe reached the durable backend since the failover
    pub fn backend_recovered(&self) -> bool {
        self.backend_recovered.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> ActiveQueue {
        self.active.read().clone()
    }

    fn registrations(&self) -> Vec<Registration> {
        self.processors.lock().clone()
    }
}

/// Owns the active queue and moves it between backends
pub struct QueueSupervisor {
    runtime: QueueRuntime,
    durable: Option<Arc<dyn QueueFactory>>,
    fallback: Arc<dyn QueueFactory>,
    errors_tx: mpsc::UnboundedSender<(u64, QueueError)>,
    /// Serializes failover and reinitialization
    switch_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueSupervisor {
    /// Supervisor over a SQLite durable queue and an in-memory fallback
    pub async fn from_config(
        config: &QueueConfig,
        limiter: Arc<RateLimiter>,
        cache: TranslationCache,
    ) -> Result<Arc<Self>> {
        let settings = WorkerSettings::from_config(config);
        let durable: Option<Arc<dyn QueueFactory>> = if config.use_durable_backend {
            let path = match &config.database_path {
                Some(path) => path.clone(),
                None => DatabaseConnection::default_database_path()?,
            };
            Some(Arc::new(SqliteQueueFactory::new(path, config.busy_timeout(), settings.clone())))
        } else {
            None
        };
        let fallback = Arc::new(MemoryQueueFactory::new(settings));

        Ok(Self::start(durable, fallback, limiter, cache, config.health_check_interval()).await)
    }

    /// Build the first queue and start the error listener and health probe
    pub async fn start(
        durable: Option<Arc<dyn QueueFactory>>,
        fallback: Arc<dyn QueueFactory>,
        limiter: Arc<RateLimiter>,
        cache: TranslationCache,
        health_interval: Duration,
    ) -> Arc<Self> {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let generation = 1;
        let reporter = ErrorReporter::new(generation, errors_tx.clone());

        let mut failed_over = false;
        let initial = match &durable {
            Some(factory) => match factory.create(reporter.clone()).await {
                Ok(queue) => Some(queue),
                Err(e) => {
                    warn!("Durable queue ({}) unavailable, starting on fallback: {}", factory.name(), e);
                    failed_over = true;
                    None
                }
            },
            None => None,
        };
        let queue = match initial {
            Some(queue) => queue,
            None => Self::create_fallback(fallback.as_ref(), reporter).await,
        };
        info!("Job queue started on {}", queue.backend_name());

        let supervisor = Arc::new(Self {
            runtime: QueueRuntime {
                active: RwLock::new(ActiveQueue { queue, generation }),
                processors: Mutex::new(Vec::new()),
                failed_over: AtomicBool::new(failed_over),
                backend_recovered: AtomicBool::new(false),
                next_generation: AtomicU64::new(generation + 1),
                limiter,
                cache,
            },
            durable,
            fallback,
            errors_tx,
            switch_lock: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&supervisor);
        let listener = tokio::spawn(error_listener(weak.clone(), errors_rx));
        let health = tokio::spawn(health_loop(weak, health_interval));
        supervisor.tasks.lock().extend([listener, health]);

        supervisor
    }

    /// The in-process queue never fails to build; a failing factory is
    /// replaced by a plain one
    async fn create_fallback(factory: &dyn QueueFactory, reporter: ErrorReporter) -> Arc<dyn JobQueue> {
        match factory.create(reporter.clone()).await {
            Ok(queue) => queue,
            Err(e) => {
                error!("Fallback queue ({}) failed to start: {}", factory.name(), e);
                Arc::new(WorkerQueue::new(MemoryBackend::new(), WorkerSettings::default(), reporter))
            }
        }
    }

    pub fn runtime(&self) -> &QueueRuntime {
        &self.runtime
    }

    pub fn active_backend(&self) -> &'static str {
        self.runtime.active().backend_name()
    }

    pub fn is_failed_over(&self) -> bool {
        self.runtime.is_failed_over()
    }

    pub fn backend_recovered(&self) -> bool {
        self.runtime.backend_recovered()
    }

    /// Run `op` on the active queue; when it hits an outage (or a queue that
    /// was just swapped out) run it once more on the new active queue
    async fn call<T, F, Fut>(&self, op: F) -> Result<T, QueueError>
    where
        F: Fn(Arc<dyn JobQueue>) -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        let current = self.runtime.snapshot();
        match op(current.queue.clone()).await {
            Err(e) if e.is_connectivity() || matches!(e, QueueError::Closed) => {
                if e.is_connectivity() {
                    warn!("Queue operation on {} failed: {}", current.queue.backend_name(), e);
                    self.handle_connectivity_error(current.generation).await;
                }
                let next = self.runtime.snapshot();
                if next.generation == current.generation {
                    return Err(e);
                }
                op(next.queue).await
            }
            other => other,
        }
    }

    pub async fn enqueue(&self, job: NewJob) -> Result<Job, QueueError> {
        self.call(|queue| {
            let job = job.clone();
            async move { queue.enqueue(job).await }
        })
        .await
    }

    /// Register a processor; it is re-registered on every queue that later
    /// becomes active
    pub async fn register_processor(
        &self,
        kind: &str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), QueueError> {
        {
            let mut processors = self.runtime.processors.lock();
            if processors.iter().any(|r| r.kind == kind) {
                warn!("Processor for '{}' already registered", kind);
                return Ok(());
            }
            processors.push(Registration {
                kind: kind.to_string(),
                concurrency,
                handler: handler.clone(),
            });
        }

        self.call(|queue| {
            let handler = handler.clone();
            async move { queue.register_processor(kind, concurrency, handler).await }
        })
        .await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, QueueError> {
        self.call(|queue| async move { queue.get_job(id).await }).await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = self.call(|queue| async move { queue.stats().await }).await?;
        stats.failed_over = self.runtime.is_failed_over();
        Ok(stats)
    }

    pub async fn remove(&self, id: &str) -> Result<bool, QueueError> {
        self.call(|queue| async move { queue.remove(id).await }).await
    }

    pub async fn clean(&self, state: JobState, grace: Duration) -> Result<usize, QueueError> {
        self.call(|queue| async move { queue.clean(state, grace).await }).await
    }

    /// Swap to the fallback queue. Runs at most once per durable instance:
    /// errors from a queue that is no longer active are ignored.
    async fn handle_connectivity_error(&self, generation: u64) {
        let _guard = self.switch_lock.lock().await;

        let current = self.runtime.snapshot();
        if current.generation != generation || self.runtime.is_failed_over() {
            debug!("Ignoring connectivity error of queue generation {}", generation);
            return;
        }

        let next_generation = self.runtime.next_generation.fetch_add(1, Ordering::SeqCst);
        let reporter = ErrorReporter::new(next_generation, self.errors_tx.clone());
        let fallback = Self::create_fallback(self.fallback.as_ref(), reporter).await;

        self.activate(fallback.clone(), next_generation).await;
        self.runtime.failed_over.store(true, Ordering::SeqCst);
        self.runtime.backend_recovered.store(false, Ordering::SeqCst);
        warn!(
            "Failed over from {} to {} queue",
            current.queue.backend_name(),
            fallback.backend_name()
        );

        let old = current.queue;
        tokio::spawn(async move { old.shutdown().await });
    }

    /// Make `queue` the active one, then give it every known processor
    async fn activate(&self, queue: Arc<dyn JobQueue>, generation: u64) {
        *self.runtime.active.write() = ActiveQueue {
            queue: queue.clone(),
            generation,
        };
        for registration in self.runtime.registrations() {
            if let Err(e) = queue
                .register_processor(&registration.kind, registration.concurrency, registration.handler)
                .await
            {
                error!("Could not register '{}' on {}: {}", registration.kind, queue.backend_name(), e);
            }
        }
    }

    /// Move back to the durable backend, carrying over jobs still waiting on
    /// the fallback. Returns how many jobs were migrated.
    pub async fn reinitialize(&self) -> Result<usize, QueueError> {
        let _guard = self.switch_lock.lock().await;

        let Some(durable) = &self.durable else {
            return Err(QueueError::Backend("no durable backend configured".to_string()));
        };
        if !self.runtime.is_failed_over() {
            debug!("Already running on {}", self.active_backend());
            return Ok(0);
        }

        let next_generation = self.runtime.next_generation.fetch_add(1, Ordering::SeqCst);
        let queue = durable
            .create(ErrorReporter::new(next_generation, self.errors_tx.clone()))
            .await?;
        let old = self.runtime.snapshot().queue;
        self.activate(queue.clone(), next_generation).await;
        self.runtime.failed_over.store(false, Ordering::SeqCst);
        self.runtime.backend_recovered.store(false, Ordering::SeqCst);

        let now = chrono::Utc::now();
        let mut migrated = 0;
        match old.drain_waiting().await {
            Ok(waiting) => {
                for job in waiting {
                    match queue.enqueue(NewJob::resume(&job, now)).await {
                        Ok(_) => migrated += 1,
                        Err(e) => error!("Could not migrate job {} ({}): {}", job.id, job.kind, e),
                    }
                }
            }
            Err(e) => error!("Could not drain {} queue: {}", old.backend_name(), e),
        }
        info!(
            "Reinitialized {} queue, migrated {} waiting job(s)",
            queue.backend_name(),
            migrated
        );

        tokio::spawn(async move { old.shutdown().await });
        Ok(migrated)
    }

    /// One health probe: watch the durable queue while it is active, probe it
    /// while running on the fallback
    async fn health_tick(&self) {
        let current = self.runtime.snapshot();
        if !self.runtime.is_failed_over() {
            if let Err(e) = current.queue.health_check().await {
                if e.is_connectivity() {
                    warn!("Health check of {} failed: {}", current.queue.backend_name(), e);
                    self.handle_connectivity_error(current.generation).await;
                }
            }
            return;
        }

        let Some(durable) = &self.durable else {
            return;
        };
        match durable.probe().await {
            Ok(()) => {
                if !self.runtime.backend_recovered.swap(true, Ordering::SeqCst) {
                    info!("Durable queue ({}) reachable again; reinitialize to switch back", durable.name());
                }
            }
            Err(e) => {
                self.runtime.backend_recovered.store(false, Ordering::SeqCst);
                debug!("Durable queue ({}) still unavailable: {}", durable.name(), e);
            }
        }
    }

    /// Stop background tasks and the active queue
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.runtime.active().shutdown().await;
    }
}

async fn error_listener(supervisor: Weak<QueueSupervisor>, mut errors: mpsc::UnboundedReceiver<(u64, QueueError)>) {
    while let Some((generation, error)) = errors.recv().await {
        let Some(supervisor) = supervisor.upgrade() else {
            break;
        };
        if error.is_connectivity() {
            supervisor.handle_connectivity_error(generation).await;
        } else {
            debug!("Queue generation {} reported: {}", generation, error);
        }
    }
}

async fn health_loop(supervisor: Weak<QueueSupervisor>, every: Duration) {
    let mut interval = tokio::time::interval(every.max(Duration::from_millis(10)));
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(supervisor) = supervisor.upgrade() else {
            break;
        };
        supervisor.health_tick().await;
    }
}
