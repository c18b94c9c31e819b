/*!
 * SQLite job backend, shared by every worker process that opens the file.
 *
 * Claims are a single `UPDATE ... RETURNING` statement and running jobs hold
 * a lease, so jobs of a crashed worker go back to waiting once the lease
 * expires.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::ErrorCode;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::database::Repository;
use crate::errors::QueueError;
use crate::queue::job::offset;
use crate::queue::worker::{WorkerQueue, WorkerSettings};
use crate::queue::{ErrorReporter, Job, JobBackend, JobQueue, JobState, QueueFactory, QueueStats};

/// Map a database error to a queue error; anything that means the file
/// cannot be used right now is a connectivity failure
pub fn classify(error: anyhow::Error) -> QueueError {
    for cause in error.chain() {
        if let Some(rusqlite::Error::SqliteFailure(failure, _)) = cause.downcast_ref::<rusqlite::Error>() {
            return match failure.code {
                ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::ReadOnly
                | ErrorCode::DiskFull
                | ErrorCode::FileLockingProtocolFailed
                | ErrorCode::PermissionDenied => QueueError::Connectivity(format!("{:#}", error)),
                _ => QueueError::Backend(format!("{:#}", error)),
            };
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return QueueError::Connectivity(format!("{:#}", error));
        }
        if let Some(e) = cause.downcast_ref::<serde_json::Error>() {
            return QueueError::Serialization(e.to_string());
        }
    }
    QueueError::Backend(format!("{:#}", error))
}

/// Job storage in the `jobs` table
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    repo: Repository,
    lease: Duration,
}

impl SqliteBackend {
    pub fn new(repo: Repository, lease: Duration) -> Self {
        Self { repo, lease }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }
}

#[async_trait]
impl JobBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(&self, job: &Job) -> Result<(), QueueError> {
        self.repo.insert_job(job).await.map_err(classify)
    }

    async fn claim(&self, kind: &str, now: DateTime<Utc>) -> Result<Option<Job>, QueueError> {
        self.repo.claim_next_job(kind, now, self.lease).await.map_err(classify)
    }

    async fn extend_lease(&self, id: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.repo.extend_lease(id, offset(now, self.lease)).await.map_err(classify)
    }

    async fn set_progress(&self, id: &str, progress: u8) -> Result<(), QueueError> {
        self.repo.set_job_progress(id, progress).await.map_err(classify)
    }

    async fn complete(&self, id: &str, return_value: Option<Value>, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.repo.complete_job(id, return_value, now).await.map_err(classify)
    }

    async fn retry(&self, id: &str, reason: &str, run_at: DateTime<Utc>) -> Result<(), QueueError> {
        self.repo.retry_job(id, reason, run_at).await.map_err(classify)
    }

    async fn fail(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.repo.fail_job(id, reason, now).await.map_err(classify)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, QueueError> {
        self.repo.get_job(id).await.map_err(classify)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats, QueueError> {
        let counts = self.repo.job_counts(now).await.map_err(classify)?;
        Ok(QueueStats {
            backend: self.name().to_string(),
            waiting: counts.waiting,
            delayed: counts.delayed,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
            failed_over: false,
        })
    }

    async fn clean(&self, state: JobState, finished_before: DateTime<Utc>) -> Result<usize, QueueError> {
        self.repo.clean_jobs(state, finished_before).await.map_err(classify)
    }

    async fn remove_waiting(&self, id: &str) -> Result<bool, QueueError> {
        self.repo.remove_waiting_job(id).await.map_err(classify)
    }

    async fn take_waiting(&self) -> Result<Vec<Job>, QueueError> {
        self.repo.take_waiting_jobs().await.map_err(classify)
    }

    async fn recover_stalled(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        self.repo.recover_stalled_jobs(now).await.map_err(classify)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.repo.ping().await.map_err(classify)
    }
}

/// Builds queues on one database file
#[derive(Debug, Clone)]
pub struct SqliteQueueFactory {
    path: PathBuf,
    busy_timeout: Duration,
    settings: WorkerSettings,
}

impl SqliteQueueFactory {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration, settings: WorkerSettings) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
            settings,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn open(&self) -> Result<Repository, QueueError> {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        tokio::task::spawn_blocking(move || Repository::open(path, busy_timeout))
            .await
            .map_err(|e| QueueError::Backend(format!("open task failed: {}", e)))?
            .map_err(classify)
    }
}

#[async_trait]
impl QueueFactory for SqliteQueueFactory {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn create(&self, errors: ErrorReporter) -> Result<Arc<dyn JobQueue>, QueueError> {
        let repo = self.open().await?;
        debug!("Durable queue opened at {:?}", self.path);
        let backend = SqliteBackend::new(repo, self.settings.lease);
        Ok(Arc::new(WorkerQueue::new(backend, self.settings.clone(), errors)))
    }

    async fn probe(&self) -> Result<(), QueueError> {
        self.open().await?.ping().await.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobContext, NewJob, handler_fn};
    use serde_json::json;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(10),
            ..WorkerSettings::default()
        }
    }

    #[test]
    fn test_classify_busyDatabase_shouldBeConnectivity() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(classify(anyhow::Error::new(busy).context("claim")).is_connectivity());
    }

    #[test]
    fn test_classify_constraintViolation_shouldBeBackendError() {
        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(matches!(classify(anyhow::Error::new(constraint)), QueueError::Backend(_)));
    }

    #[tokio::test]
    async fn test_probe_onUnopenablePath_shouldFailWithConnectivity() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SqliteQueueFactory::new(dir.path(), Duration::from_millis(50), settings());
        assert!(factory.probe().await.unwrap_err().is_connectivity());
    }

    #[tokio::test]
    async fn test_queuesOnSameFile_shouldShareJobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let factory = SqliteQueueFactory::new(&path, Duration::from_secs(1), settings());
        let producer = factory.create(ErrorReporter::disabled()).await.unwrap();
        let consumer = factory.create(ErrorReporter::disabled()).await.unwrap();

        consumer
            .register_processor("echo", 1, handler_fn(|ctx: JobContext| async move {
                Ok(Some(ctx.job.payload.clone()))
            }))
            .await
            .unwrap();
        let job = producer.enqueue(NewJob::new("echo", json!({"n": 7}))).await.unwrap();

        let mut done = None;
        for _ in 0..300 {
            let current = producer.get_job(&job.id).await.unwrap().unwrap();
            if current.state == JobState::Completed {
                done = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(done.unwrap().return_value, Some(json!({"n": 7})));

        consumer.shutdown().await;
        producer.shutdown().await;
    }
}
