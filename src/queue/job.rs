/*!
 * Job records and queue statistics.
 */

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// `now + delay`, saturating on out-of-range delays
pub fn offset(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now)
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Active => write!(f, "active"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            _ => Err(anyhow!("Invalid job state: {}", s)),
        }
    }
}

/// A unit of work, self-contained so it can be persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub payload: Value,
    pub state: JobState,
    /// Attempts started so far, including the running one
    pub attempts: u32,
    pub max_attempts: u32,
    /// 0..=100
    pub progress: u8,
    /// Earliest time the job may be claimed
    pub run_at: DateTime<Utc>,
    pub failed_reason: Option<String>,
    pub return_value: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Materialise a new job request at `now`
    pub fn from_new(new: NewJob, default_max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            kind: new.kind,
            payload: new.payload,
            state: JobState::Waiting,
            attempts: new.resumed_attempts,
            max_attempts: new.max_attempts.unwrap_or(default_max_attempts).max(1),
            progress: 0,
            run_at: offset(now, new.delay),
            failed_reason: None,
            return_value: None,
            created_at: now,
            finished_at: None,
        }
    }

    /// The running attempt is the last one allowed
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, JobState::Completed | JobState::Failed)
    }
}

/// Request to enqueue a job
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub kind: String,
    pub payload: Value,
    /// Keep an existing id (used when migrating jobs between queues)
    pub id: Option<String>,
    pub max_attempts: Option<u32>,
    pub delay: Duration,
    /// Attempts already spent on another queue
    pub resumed_attempts: u32,
}

impl NewJob {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            id: None,
            max_attempts: None,
            delay: Duration::ZERO,
            resumed_attempts: 0,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Re-enqueue request for a waiting job, keeping its id, spent attempts and
    /// remaining delay
    pub fn resume(job: &Job, now: DateTime<Utc>) -> Self {
        let delay = (job.run_at - now).to_std().unwrap_or(Duration::ZERO);
        Self {
            kind: job.kind.clone(),
            payload: job.payload.clone(),
            id: Some(job.id.clone()),
            max_attempts: Some(job.max_attempts),
            delay,
            resumed_attempts: job.attempts,
        }
    }
}

/// Job counts of a queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub backend: String,
    pub waiting: usize,
    /// Waiting jobs whose run time is still in the future
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    /// The supervisor is running on the fallback queue
    #[serde(default)]
    pub failed_over: bool,
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}{}] waiting: {} ({} delayed), active: {}, completed: {}, failed: {}",
            self.backend,
            if self.failed_over { ", failed over" } else { "" },
            self.waiting,
            self.delayed,
            self.active,
            self.completed,
            self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fromNew_shouldApplyDelayAndDefaults() {
        let now = Utc::now();
        let job = Job::from_new(
            NewJob::new("translate_resource", json!({"a": 1})).with_delay(Duration::from_secs(5)),
            3,
            now,
        );
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.run_at, now + chrono::Duration::seconds(5));
        assert!(!job.id.is_empty());
    }

    #[test]
    fn test_resume_shouldKeepIdAndRemainingDelay() {
        let now = Utc::now();
        let mut job = Job::from_new(NewJob::new("k", json!(null)).with_delay(Duration::from_secs(10)), 3, now);
        job.attempts = 2;
        let resumed = NewJob::resume(&job, now + chrono::Duration::seconds(4));
        assert_eq!(resumed.id.as_deref(), Some(job.id.as_str()));
        assert_eq!(resumed.delay, Duration::from_secs(6));

        let moved = Job::from_new(resumed, 5, now);
        assert_eq!(moved.attempts, 2);
        assert_eq!(moved.max_attempts, 3);
        assert!(!moved.is_final_attempt());

        let overdue = NewJob::resume(&job, now + chrono::Duration::seconds(60));
        assert_eq!(overdue.delay, Duration::ZERO);
    }

    #[test]
    fn test_jobState_shouldParseDisplayedValues() {
        for state in [JobState::Waiting, JobState::Active, JobState::Completed, JobState::Failed] {
            assert_eq!(state.to_string().parse::<JobState>().unwrap(), state);
        }
        assert!("paused".parse::<JobState>().is_err());
    }
}
