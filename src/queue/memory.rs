/*!
 * In-process job backend, used as the fallback queue.
 *
 * Jobs live in a map behind a `parking_lot` mutex and are lost with the
 * process.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::QueueError;
use crate::queue::worker::{WorkerQueue, WorkerSettings};
use crate::queue::{ErrorReporter, Job, JobBackend, JobQueue, JobState, QueueFactory, QueueStats};

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<String, Job>,
    /// Insertion sequence, used to break run_at ties
    seq: HashMap<String, u64>,
    next_seq: u64,
}

impl MemoryState {
    fn update<F>(&mut self, id: &str, f: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut Job),
    {
        let job = self.jobs.get_mut(id).ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        f(job);
        Ok(())
    }
}

/// Single-process job storage
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, job: &Job) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if state.jobs.contains_key(&job.id) {
            return Err(QueueError::Backend(format!("duplicate job id {}", job.id)));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.seq.insert(job.id.clone(), seq);
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn claim(&self, kind: &str, now: DateTime<Utc>) -> Result<Option<Job>, QueueError> {
        let mut state = self.state.lock();
        let next = state
            .jobs
            .values()
            .filter(|j| j.state == JobState::Waiting && j.kind == kind && j.run_at <= now)
            .min_by_key(|j| (j.run_at, state.seq.get(&j.id).copied().unwrap_or(u64::MAX)))
            .map(|j| j.id.clone());

        let Some(id) = next else {
            return Ok(None);
        };
        let job = state.jobs.get_mut(&id).ok_or_else(|| QueueError::NotFound(id.clone()))?;
        job.state = JobState::Active;
        job.attempts += 1;
        job.progress = 0;
        Ok(Some(job.clone()))
    }

    async fn set_progress(&self, id: &str, progress: u8) -> Result<(), QueueError> {
        self.state.lock().update(id, |job| job.progress = progress)
    }

    async fn complete(&self, id: &str, return_value: Option<Value>, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.state.lock().update(id, |job| {
            job.state = JobState::Completed;
            job.progress = 100;
            job.return_value = return_value;
            job.finished_at = Some(now);
        })
    }

    async fn retry(&self, id: &str, reason: &str, run_at: DateTime<Utc>) -> Result<(), QueueError> {
        self.state.lock().update(id, |job| {
            job.state = JobState::Waiting;
            job.failed_reason = Some(reason.to_string());
            job.run_at = run_at;
        })
    }

    async fn fail(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.state.lock().update(id, |job| {
            job.state = JobState::Failed;
            job.failed_reason = Some(reason.to_string());
            job.finished_at = Some(now);
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.state.lock().jobs.get(id).cloned())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats, QueueError> {
        let state = self.state.lock();
        let mut stats = QueueStats { backend: self.name().to_string(), ..QueueStats::default() };
        for job in state.jobs.values() {
            match job.state {
                JobState::Waiting => {
                    stats.waiting += 1;
                    if job.run_at > now {
                        stats.delayed += 1;
                    }
                }
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn clean(&self, state: JobState, finished_before: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut guard = self.state.lock();
        let doomed: Vec<String> = guard
            .jobs
            .values()
            .filter(|j| j.state == state && j.finished_at.is_some_and(|t| t < finished_before))
            .map(|j| j.id.clone())
            .collect();
        for id in &doomed {
            guard.jobs.remove(id);
            guard.seq.remove(id);
        }
        Ok(doomed.len())
    }

    async fn remove_waiting(&self, id: &str) -> Result<bool, QueueError> {
        let mut state = self.state.lock();
        match state.jobs.get(id) {
            Some(job) if job.state == JobState::Waiting => {
                state.jobs.remove(id);
                state.seq.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn take_waiting(&self) -> Result<Vec<Job>, QueueError> {
        let mut state = self.state.lock();
        let mut waiting: Vec<(u64, Job)> = Vec::new();
        let ids: Vec<String> = state
            .jobs
            .values()
            .filter(|j| j.state == JobState::Waiting)
            .map(|j| j.id.clone())
            .collect();
        for id in ids {
            let seq = state.seq.remove(&id).unwrap_or(u64::MAX);
            if let Some(job) = state.jobs.remove(&id) {
                waiting.push((seq, job));
            }
        }
        waiting.sort_by_key(|(seq, _)| *seq);
        Ok(waiting.into_iter().map(|(_, job)| job).collect())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Builds in-process queues
#[derive(Debug, Clone)]
pub struct MemoryQueueFactory {
    settings: WorkerSettings,
}

impl MemoryQueueFactory {
    pub fn new(settings: WorkerSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl QueueFactory for MemoryQueueFactory {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, errors: ErrorReporter) -> Result<Arc<dyn JobQueue>, QueueError> {
        Ok(Arc::new(WorkerQueue::new(MemoryBackend::new(), self.settings.clone(), errors)))
    }

    async fn probe(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::NewJob;
    use serde_json::json;

    fn job(kind: &str, now: DateTime<Utc>, delay_secs: u64) -> Job {
        Job::from_new(
            NewJob::new(kind, json!({})).with_delay(std::time::Duration::from_secs(delay_secs)),
            3,
            now,
        )
    }

    #[tokio::test]
    async fn test_claim_shouldTakeOldestDueJobOfKind() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let first = job("a", now, 0);
        let second = job("a", now, 0);
        let delayed = job("a", now, 60);
        let other = job("b", now, 0);
        for j in [&delayed, &first, &second, &other] {
            backend.insert(j).await.unwrap();
        }

        let claimed = backend.claim("a", now).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.state, JobState::Active);

        assert_eq!(backend.claim("a", now).await.unwrap().unwrap().id, second.id);
        assert!(backend.claim("a", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_shouldCountStatesAndDelayed() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let done = job("a", now, 0);
        backend.insert(&done).await.unwrap();
        backend.insert(&job("a", now, 60)).await.unwrap();
        backend.claim("a", now).await.unwrap();
        backend.complete(&done.id, Some(json!("ok")), now).await.unwrap();

        let stats = backend.stats(now).await.unwrap();
        assert_eq!((stats.waiting, stats.delayed, stats.completed), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_removeWaiting_shouldIgnoreActiveJobs() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let active = job("a", now, 0);
        let waiting = job("b", now, 0);
        backend.insert(&active).await.unwrap();
        backend.insert(&waiting).await.unwrap();
        backend.claim("a", now).await.unwrap();

        assert!(!backend.remove_waiting(&active.id).await.unwrap());
        assert!(backend.remove_waiting(&waiting.id).await.unwrap());
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_takeWaiting_shouldPreserveInsertionOrder() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let j = job("a", now, 0);
            backend.insert(&j).await.unwrap();
            ids.push(j.id);
        }

        let taken: Vec<String> = backend.take_waiting().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(taken, ids);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_clean_shouldRemoveOldFinishedJobs() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let j = job("a", now, 0);
        backend.insert(&j).await.unwrap();
        backend.claim("a", now).await.unwrap();
        backend.fail(&j.id, "boom", now).await.unwrap();

        assert_eq!(backend.clean(JobState::Completed, now + chrono::Duration::seconds(1)).await.unwrap(), 0);
        assert_eq!(backend.clean(JobState::Failed, now + chrono::Duration::seconds(1)).await.unwrap(), 1);
    }
}
